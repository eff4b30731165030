use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, PgPool, Postgres};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

const CUSTOMER_COLUMNS: &str = "id, reference_number, company_name, contact_person, contact_number, \
     email_address, address, region, type_client, status, tsa, tsm, manager, remarks, \
     created_at, updated_at";

/// Ownership column a bulk transfer rewrites
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS, EnumString, Display,
)]
#[strum(ascii_case_insensitive)]
pub enum OwnerField {
    #[serde(rename = "TSM", alias = "tsm")]
    #[strum(serialize = "TSM")]
    Tsm,
    #[serde(rename = "Manager", alias = "manager")]
    #[strum(serialize = "Manager")]
    Manager,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub reference_number: Option<String>,
    pub company_name: String,
    pub contact_person: String,
    pub contact_number: String,
    pub email_address: String,
    pub address: String,
    pub region: String,
    pub type_client: Option<String>,
    pub status: Option<String>,
    pub tsa: Option<String>,     // Owning sales agent
    pub tsm: Option<String>,     // Territory sales manager
    pub manager: Option<String>,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, PartialEq)]
pub struct CreateCustomer {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub contact_person: String,
    #[serde(default)]
    pub contact_number: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub region: String,
    pub type_client: Option<String>,
    pub status: Option<String>,
    pub tsa: Option<String>,
    pub tsm: Option<String>,
    pub manager: Option<String>,
    pub remarks: Option<String>,
}

/// Partial update applied to customers already held in memory.
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS, PartialEq)]
pub struct CustomerPatch {
    pub status: Option<String>,
    pub type_client: Option<String>,
    pub tsm: Option<String>,
    pub manager: Option<String>,
    pub reference_number: Option<String>,
}

impl CustomerPatch {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn owner(field: OwnerField, new_owner: impl Into<String>) -> Self {
        let new_owner = Some(new_owner.into());
        match field {
            OwnerField::Tsm => Self {
                tsm: new_owner,
                ..Default::default()
            },
            OwnerField::Manager => Self {
                manager: new_owner,
                ..Default::default()
            },
        }
    }

    pub fn reference_number(reference_number: impl Into<String>) -> Self {
        Self {
            reference_number: Some(reference_number.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, PartialEq)]
pub struct ReferenceUpdate {
    pub id: i64,
    pub reference_number: String,
}

impl Customer {
    pub fn apply_patch(&mut self, patch: &CustomerPatch) {
        if let Some(status) = &patch.status {
            self.status = Some(status.clone());
        }
        if let Some(type_client) = &patch.type_client {
            self.type_client = Some(type_client.clone());
        }
        if let Some(tsm) = &patch.tsm {
            self.tsm = Some(tsm.clone());
        }
        if let Some(manager) = &patch.manager {
            self.manager = Some(manager.clone());
        }
        if let Some(reference_number) = &patch.reference_number {
            self.reference_number = Some(reference_number.clone());
        }
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateCustomer,
        reference_number: Option<&str>,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Customer>(&format!(
            r#"INSERT INTO customers (reference_number, company_name, contact_person, contact_number,
                                      email_address, address, region, type_client, status, tsa, tsm,
                                      manager, remarks)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
               RETURNING {CUSTOMER_COLUMNS}"#
        ))
        .bind(reference_number)
        .bind(&data.company_name)
        .bind(&data.contact_person)
        .bind(&data.contact_number)
        .bind(&data.email_address)
        .bind(&data.address)
        .bind(&data.region)
        .bind(&data.type_client)
        .bind(&data.status)
        .bind(&data.tsa)
        .bind(&data.tsm)
        .bind(&data.manager)
        .bind(&data.remarks)
        .fetch_one(executor)
        .await
    }

    pub async fn delete_many(pool: &PgPool, ids: &[i64]) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM customers WHERE id = ANY($1)")
            .bind(ids)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_status_many(
        pool: &PgPool,
        ids: &[i64],
        status: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE customers SET status = $2, updated_at = now() WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(status)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn transfer_owner_many(
        pool: &PgPool,
        ids: &[i64],
        field: OwnerField,
        new_owner: &str,
    ) -> Result<u64, sqlx::Error> {
        let sql = match field {
            OwnerField::Tsm => {
                "UPDATE customers SET tsm = $2, updated_at = now() WHERE id = ANY($1)"
            }
            OwnerField::Manager => {
                "UPDATE customers SET manager = $2, updated_at = now() WHERE id = ANY($1)"
            }
        };
        let result = sqlx::query(sql)
            .bind(ids)
            .bind(new_owner)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_reference_number<'e, E>(
        executor: E,
        id: i64,
        reference_number: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            "UPDATE customers SET reference_number = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(reference_number)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Write every update or none of them
    pub async fn update_reference_numbers(
        pool: &PgPool,
        updates: &[ReferenceUpdate],
    ) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut affected = 0;
        for update in updates {
            affected +=
                Self::set_reference_number(&mut *tx, update.id, &update.reference_number).await?;
        }
        tx.commit().await?;
        Ok(affected)
    }

    /// Highest numeric suffix among references starting with `prefix`, or 0.
    pub async fn max_reference_suffix(pool: &PgPool, prefix: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COALESCE(MAX(CAST(substr(reference_number, char_length($1) + 1) AS BIGINT)), 0)
               FROM customers
               WHERE starts_with(reference_number, $1)
                 AND substr(reference_number, char_length($1) + 1) ~ '^[0-9]{1,18}$'"#,
        )
        .bind(prefix)
        .fetch_one(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn customer() -> Customer {
        let now = Utc::now();
        Customer {
            id: 1,
            reference_number: None,
            company_name: "Acme Corp".to_string(),
            contact_person: "Jane".to_string(),
            contact_number: "555-1".to_string(),
            email_address: String::new(),
            address: String::new(),
            region: "NCR".to_string(),
            type_client: None,
            status: Some("Pending".to_string()),
            tsa: Some("TSA-001".to_string()),
            tsm: Some("Old TSM".to_string()),
            manager: None,
            remarks: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut c = customer();
        c.apply_patch(&CustomerPatch::status("Active"));
        assert_eq!(c.status.as_deref(), Some("Active"));
        assert_eq!(c.tsm.as_deref(), Some("Old TSM"));
        assert_eq!(c.type_client, None);
    }

    #[test]
    fn owner_patch_targets_selected_column() {
        let mut c = customer();
        c.apply_patch(&CustomerPatch::owner(OwnerField::Manager, "New Manager"));
        assert_eq!(c.manager.as_deref(), Some("New Manager"));
        assert_eq!(c.tsm.as_deref(), Some("Old TSM"));

        c.apply_patch(&CustomerPatch::owner(OwnerField::Tsm, "New TSM"));
        assert_eq!(c.tsm.as_deref(), Some("New TSM"));
    }

    #[test]
    fn owner_field_parses_wire_names() {
        assert_eq!(OwnerField::from_str("TSM").unwrap(), OwnerField::Tsm);
        assert_eq!(OwnerField::from_str("manager").unwrap(), OwnerField::Manager);
        assert_eq!(OwnerField::Tsm.to_string(), "TSM");

        let parsed: OwnerField = serde_json::from_str("\"Manager\"").unwrap();
        assert_eq!(parsed, OwnerField::Manager);
    }
}
