//! Staff directory (`hr` domain).

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use deskside_core::{Domain, Employee, EmployeeId, Role, RoleId, StaffDirectory};

use crate::storage::{Storage, StorageError};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT NOT NULL UNIQUE,
    description TEXT
);

CREATE TABLE IF NOT EXISTS employees (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name        TEXT NOT NULL,
    last_name         TEXT NOT NULL,
    email             TEXT UNIQUE NOT NULL,
    role_id           INTEGER REFERENCES roles(id),
    hire_date         TEXT NOT NULL,
    employment_status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS performance_ratings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    employee_id INTEGER NOT NULL REFERENCES employees(id),
    rating      INTEGER NOT NULL CHECK (rating >= 1 AND rating <= 5),
    review_date TEXT NOT NULL,
    comments    TEXT
);
"#;

const SELECT_EMPLOYEE: &str = r#"
SELECT e.id, e.first_name, e.last_name, e.email, e.role_id, e.employment_status
FROM employees e
"#;

/// Input for adding an employee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEmployee {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role_id: Option<RoleId>,
    pub hire_date: NaiveDate,
}

/// SQLite-backed [`StaffDirectory`].
#[derive(Debug, Clone)]
pub struct StaffRepository {
    storage: Storage,
}

impl StaffRepository {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn init(&self) -> Result<(), StorageError> {
        self.storage.init_schema(Domain::Hr, SCHEMA).await
    }

    /// Create a role, or return the existing one with the same title.
    pub async fn ensure_role(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<RoleId, StorageError> {
        let title = title.to_owned();
        let description = description.map(str::to_owned);
        self.storage
            .transaction(Domain::Hr, move |tx| {
                Box::pin(async move {
                    sqlx::query("INSERT OR IGNORE INTO roles (title, description) VALUES (?1, ?2)")
                        .bind(&title)
                        .bind(&description)
                        .execute(&mut **tx)
                        .await?;
                    let id: i64 = sqlx::query_scalar("SELECT id FROM roles WHERE title = ?1")
                        .bind(&title)
                        .fetch_one(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(RoleId::new(id))
                })
            })
            .await
    }

    /// Add an employee, or return the existing one with the same email.
    pub async fn ensure_employee(&self, employee: NewEmployee) -> Result<EmployeeId, StorageError> {
        self.storage
            .transaction(Domain::Hr, move |tx| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        INSERT OR IGNORE INTO employees (first_name, last_name, email, role_id, hire_date)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                    )
                    .bind(&employee.first_name)
                    .bind(&employee.last_name)
                    .bind(&employee.email)
                    .bind(employee.role_id.map(RoleId::get))
                    .bind(employee.hire_date.to_string())
                    .execute(&mut **tx)
                    .await?;
                    let id: i64 = sqlx::query_scalar("SELECT id FROM employees WHERE email = ?1")
                        .bind(&employee.email)
                        .fetch_one(&mut **tx)
                        .await?;
                    Ok::<_, StorageError>(EmployeeId::new(id))
                })
            })
            .await
    }
}

#[async_trait]
impl StaffDirectory for StaffRepository {
    async fn all_staff(&self) -> anyhow::Result<Vec<Employee>> {
        let sql = format!("{SELECT_EMPLOYEE} ORDER BY e.id ASC");
        let mut conn = self.storage.connection(Domain::Hr).await?;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .context("failed to list staff")?;
        Ok(rows.iter().map(row_to_employee).collect::<Result<Vec<_>, _>>()?)
    }

    async fn staff_by_role(&self, role_title: &str) -> anyhow::Result<Option<Employee>> {
        let sql = format!(
            "{SELECT_EMPLOYEE} JOIN roles r ON r.id = e.role_id WHERE r.title = ?1 ORDER BY e.id ASC LIMIT 1"
        );
        let mut conn = self.storage.connection(Domain::Hr).await?;
        let row = sqlx::query(&sql)
            .bind(role_title)
            .fetch_optional(&mut *conn)
            .await
            .with_context(|| format!("failed to look up staff with role {role_title:?}"))?;
        Ok(row.as_ref().map(row_to_employee).transpose()?)
    }

    async fn roles(&self) -> anyhow::Result<Vec<Role>> {
        let mut conn = self.storage.connection(Domain::Hr).await?;
        let rows = sqlx::query("SELECT id, title, description FROM roles ORDER BY id ASC")
            .fetch_all(&mut *conn)
            .await
            .context("failed to list roles")?;

        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            roles.push(Role {
                id: RoleId::new(row.try_get("id")?),
                title: row.try_get("title")?,
                description: row.try_get("description")?,
            });
        }
        Ok(roles)
    }

    async fn employee(&self, id: EmployeeId) -> anyhow::Result<Option<Employee>> {
        let sql = format!("{SELECT_EMPLOYEE} WHERE e.id = ?1");
        let mut conn = self.storage.connection(Domain::Hr).await?;
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await
            .context("failed to load employee")?;
        Ok(row.as_ref().map(row_to_employee).transpose()?)
    }
}

fn row_to_employee(row: &SqliteRow) -> Result<Employee, StorageError> {
    let role_id: Option<i64> = row.try_get("role_id")?;
    Ok(Employee {
        id: EmployeeId::new(row.try_get("id")?),
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        role_id: role_id.map(RoleId::new),
        employment_status: row.try_get("employment_status")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn hire(first: &str, last: &str, role_id: Option<RoleId>) -> NewEmployee {
        NewEmployee {
            first_name: first.into(),
            last_name: last.into(),
            email: format!("{}.{}@example.com", first.to_lowercase(), last.to_lowercase()),
            role_id,
            hire_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn staff_by_role_finds_the_first_holder() {
        let dir = tempfile::tempdir().unwrap();
        let repo = StaffRepository::new(Storage::new(StorageConfig::in_dir(dir.path())));
        repo.init().await.unwrap();

        let hr = repo.ensure_role("HR Manager", Some("People operations")).await.unwrap();
        let it = repo.ensure_role("IT Support", None).await.unwrap();
        assert_eq!(repo.ensure_role("HR Manager", None).await.unwrap(), hr);

        repo.ensure_employee(hire("Sam", "Okafor", Some(it))).await.unwrap();
        let priya = repo.ensure_employee(hire("Priya", "Nair", Some(hr))).await.unwrap();
        repo.ensure_employee(hire("Lee", "Chen", Some(hr))).await.unwrap();

        let found = repo.staff_by_role("HR Manager").await.unwrap().unwrap();
        assert_eq!(found.id, priya);
        assert_eq!(found.full_name(), "Priya Nair");
        assert!(found.is_active());

        assert!(repo.staff_by_role("CEO").await.unwrap().is_none());
        assert_eq!(repo.all_staff().await.unwrap().len(), 3);
        assert_eq!(repo.roles().await.unwrap().len(), 2);
        assert_eq!(repo.employee(priya).await.unwrap().unwrap().role_id, Some(hr));
    }
}
