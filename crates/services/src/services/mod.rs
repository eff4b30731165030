pub mod backend;
pub mod bulk_mutation;
pub mod completeness;
pub mod config;
pub mod csv_export;
pub mod csv_import;
pub mod duplicates;
pub mod pagination;
pub mod record;
pub mod record_store;
pub mod reference_number;
pub mod session;
pub mod working_set;
