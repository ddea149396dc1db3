//! PostgreSQL [`Store`] on a `sqlx` pool. Tables live in `sql/schema.sql`.

use super::{MemberRemoval, Store, StoreError};
use crate::{
    authz::{
        Resource,
        schema::{GROUP_NAMESPACE, GROUP_PRINCIPAL, ORGANIZATION_NAMESPACE, PROJECT_NAMESPACE, USER_PRINCIPAL},
    },
    billing::plan::{Behavior, BillingScheme, Feature, Plan, Price, Product, UsageType},
    domain::{
        Metadata, State,
        audit::{AuditEntity, AuditRecord},
        group::Group,
        organization::Organization,
        permission::Permission,
        policy::{Policy, PolicyFilter},
        preference::Preference,
        project::Project,
        role::Role,
        user::User,
    },
    rql::{Compiled, Group as RqlGroup, GroupCount, Page, Pagination, sql},
};
use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres, QueryBuilder, Row, Transaction,
    postgres::PgRow,
    types::Json,
};
use uuid::Uuid;

/// True when the database rejected a write with SQLSTATE 23505.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn conflict_on_unique(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |err| {
        if is_unique_violation(&err) {
            StoreError::Conflict(format!("{what} already exists"))
        } else {
            StoreError::Database(err)
        }
    }
}

fn metadata(row: &PgRow) -> Result<Metadata, sqlx::Error> {
    Ok(row.try_get::<Json<Metadata>, _>("metadata")?.0)
}

fn state(row: &PgRow) -> Result<State, sqlx::Error> {
    Ok(State::parse(&row.try_get::<String, _>("state")?))
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        title: row.try_get("title")?,
        avatar: row.try_get("avatar")?,
        metadata: metadata(row)?,
        state: state(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn org_from_row(row: &PgRow) -> Result<Organization, sqlx::Error> {
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        avatar: row.try_get("avatar")?,
        metadata: metadata(row)?,
        state: state(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn project_from_row(row: &PgRow) -> Result<Project, sqlx::Error> {
    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        org_id: row.try_get("org_id")?,
        metadata: metadata(row)?,
        state: state(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<Group, sqlx::Error> {
    Ok(Group {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        org_id: row.try_get("org_id")?,
        metadata: metadata(row)?,
        state: state(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        namespace: row.try_get("namespace")?,
        slug: row.try_get("slug")?,
        key: row.try_get("key")?,
        metadata: metadata(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        org_id: row.try_get("org_id")?,
        permissions: row.try_get("permissions")?,
        scopes: row.try_get("scopes")?,
        state: state(row)?,
        metadata: metadata(row)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn policy_from_row(row: &PgRow) -> Result<Policy, sqlx::Error> {
    let resource_type: String = row.try_get("resource_type")?;
    let resource_id: String = row.try_get("resource_id")?;
    let principal_type: String = row.try_get("principal_type")?;
    let principal_id: String = row.try_get("principal_id")?;
    Ok(Policy {
        id: row.try_get("id")?,
        role_id: row.try_get("role_id")?,
        resource: Resource::new(&resource_type, resource_id),
        principal: Resource::new(&principal_type, principal_id),
        created_at: row.try_get("created_at")?,
    })
}

fn preference_from_row(row: &PgRow) -> Result<Preference, sqlx::Error> {
    Ok(Preference {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        value: row.try_get("value")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditRecord, sqlx::Error> {
    let target_id: Option<String> = row.try_get("target_id")?;
    let target = match target_id {
        Some(id) => Some(AuditEntity {
            id,
            kind: row.try_get::<Option<String>, _>("target_type")?.unwrap_or_default(),
            name: row.try_get::<Option<String>, _>("target_name")?.unwrap_or_default(),
        }),
        None => None,
    };
    Ok(AuditRecord {
        id: row.try_get("id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        event: row.try_get("event")?,
        actor: AuditEntity {
            id: row.try_get("actor_id")?,
            kind: row.try_get("actor_type")?,
            name: row.try_get("actor_name")?,
        },
        resource: AuditEntity {
            id: row.try_get("resource_id")?,
            kind: row.try_get("resource_type")?,
            name: row.try_get("resource_name")?,
        },
        target,
        org_id: row.try_get("org_id")?,
        metadata: metadata(row)?,
        occurred_at: row.try_get("occurred_at")?,
        created_at: row.try_get("created_at")?,
        content_hash: row.try_get("content_hash")?,
    })
}

fn price_from_row(row: &PgRow) -> Result<Price, sqlx::Error> {
    Ok(Price {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        interval: row.try_get("interval")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        usage_type: UsageType::parse(&row.try_get::<String, _>("usage_type")?),
        billing_scheme: BillingScheme::parse(&row.try_get::<String, _>("billing_scheme")?),
        metadata: metadata(row)?,
    })
}

fn feature_from_row(row: &PgRow) -> Result<Feature, sqlx::Error> {
    Ok(Feature {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        metadata: metadata(row)?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        behavior: Behavior::parse(&row.try_get::<String, _>("behavior")?),
        metadata: metadata(row)?,
        prices: Vec::new(),
        features: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn plan_from_row(row: &PgRow) -> Result<Plan, sqlx::Error> {
    Ok(Plan {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        interval: row.try_get("interval")?,
        trial_days: row.try_get("trial_days")?,
        on_start_credits: row.try_get("on_start_credits")?,
        state: state(row)?,
        metadata: metadata(row)?,
        products: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn decode_all<T>(
    rows: &[PgRow],
    decode: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, StoreError> {
    Ok(rows.iter().map(decode).collect::<Result<Vec<_>, _>>()?)
}

fn position(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// `... WHERE` clause selecting the policies a filter matches.
fn push_policy_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &PolicyFilter) {
    builder.push(" WHERE TRUE");
    if !filter.resources.is_empty() {
        builder.push(" AND resource_type || ':' || resource_id = ANY(");
        builder.push_bind(filter.resources.iter().map(ToString::to_string).collect::<Vec<_>>());
        builder.push(")");
    }
    if !filter.principals.is_empty() {
        builder.push(" AND principal_type || ':' || principal_id = ANY(");
        builder.push_bind(filter.principals.iter().map(ToString::to_string).collect::<Vec<_>>());
        builder.push(")");
    }
    if let Some(role_id) = filter.role_id {
        builder.push(" AND role_id = ");
        builder.push_bind(role_id);
    }
}

async fn insert_policy_tx(
    tx: &mut Transaction<'_, Postgres>,
    policy: &Policy,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO policies (id, role_id, resource_type, resource_id, principal_type, principal_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(policy.id)
    .bind(policy.role_id)
    .bind(&policy.resource.namespace)
    .bind(&policy.resource.id)
    .bind(&policy.principal.namespace)
    .bind(&policy.principal.id)
    .bind(policy.created_at)
    .execute(&mut **tx)
    .await
    .map_err(conflict_on_unique("policy"))?;
    Ok(())
}

pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Splits a schema file into statements on lines ending with `;`.
#[must_use]
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');

        if trimmed.ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns the first failing statement's database error.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for statement in split_sql_statements(SCHEMA_SQL) {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search<T>(
        &self,
        query: &Compiled,
        decode: fn(&PgRow) -> Result<T, sqlx::Error>,
    ) -> Result<Page<T>, StoreError> {
        let mut select = sql::select("*", query);
        let rows = select.build().fetch_all(&self.pool).await?;
        let items = decode_all(&rows, decode)?;

        let mut count = sql::count(query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let group = match (query.group_by, sql::group_counts(query)) {
            (Some(field), Some(mut builder)) => {
                let rows = builder.build().fetch_all(&self.pool).await?;
                let mut data = Vec::with_capacity(rows.len());
                for row in &rows {
                    let count: i64 = row.try_get("count")?;
                    data.push(GroupCount {
                        name: row.try_get("name")?,
                        count: u64::try_from(count).unwrap_or_default(),
                    });
                }
                Some(RqlGroup {
                    name: field.name.to_string(),
                    data,
                })
            }
            _ => None,
        };

        Ok(Page {
            items,
            pagination: Pagination {
                offset: query.offset,
                limit: query.limit,
                total_count: u64::try_from(total).unwrap_or_default(),
            },
            group,
        })
    }

    /// Loads prices and features onto each product.
    async fn hydrate_products(&self, mut products: Vec<Product>) -> Result<Vec<Product>, StoreError> {
        for product in &mut products {
            let rows = sqlx::query("SELECT * FROM prices WHERE product_id = $1 ORDER BY position")
                .bind(product.id)
                .fetch_all(&self.pool)
                .await?;
            product.prices = decode_all(&rows, price_from_row)?;

            let rows = sqlx::query("SELECT * FROM features WHERE product_id = $1 ORDER BY position")
                .bind(product.id)
                .fetch_all(&self.pool)
                .await?;
            product.features = decode_all(&rows, feature_from_row)?;
        }
        Ok(products)
    }

    async fn hydrate_plan(&self, mut plan: Plan) -> Result<Plan, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT p.* FROM products p
            JOIN plan_products pp ON pp.product_id = p.id
            WHERE pp.plan_id = $1
            ORDER BY pp.position
            ",
        )
        .bind(plan.id)
        .fetch_all(&self.pool)
        .await?;
        plan.products = self
            .hydrate_products(decode_all(&rows, product_from_row)?)
            .await?;
        Ok(plan)
    }

    async fn fetch_user_where(&self, column: &str, value: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT * FROM users WHERE {column} = $1"))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO users (id, name, email, title, avatar, metadata, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.title)
        .bind(&user.avatar)
        .bind(Json(&user.metadata))
        .bind(user.state.as_str())
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique("user"))?;
        Ok(())
    }

    async fn fetch_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn fetch_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("name", name).await
    }

    async fn fetch_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.fetch_user_where("email", email).await
    }

    async fn fetch_users(&self, ids: &[Uuid]) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users WHERE id = ANY($1) ORDER BY created_at")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows, user_from_row)
    }

    async fn search_users(&self, query: &Compiled) -> Result<Page<User>, StoreError> {
        self.search(query, user_from_row).await
    }

    async fn update_user(&self, user: &User) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE users
            SET title = $2, avatar = $3, metadata = $4, state = $5, updated_at = $6
            WHERE id = $1
            ",
        )
        .bind(user.id)
        .bind(&user.title)
        .bind(&user.avatar)
        .bind(Json(&user.metadata))
        .bind(user.state.as_str())
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM policies WHERE principal_type = $1 AND principal_id = $2")
            .bind(USER_PRINCIPAL)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM preferences WHERE resource_type = $1 AND resource_id = $2")
            .bind(USER_PRINCIPAL)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_org(&self, org: &Organization, owner: &Policy) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO organizations (id, name, title, avatar, metadata, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.title)
        .bind(&org.avatar)
        .bind(Json(&org.metadata))
        .bind(org.state.as_str())
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(conflict_on_unique("organization"))?;
        insert_policy_tx(&mut tx, owner).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_org(&self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(org_from_row).transpose()?)
    }

    async fn fetch_org_by_name(&self, name: &str) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query("SELECT * FROM organizations WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(org_from_row).transpose()?)
    }

    async fn fetch_orgs(&self, ids: &[Uuid]) -> Result<Vec<Organization>, StoreError> {
        let rows = sqlx::query("SELECT * FROM organizations WHERE id = ANY($1) ORDER BY created_at")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows, org_from_row)
    }

    async fn search_orgs(&self, query: &Compiled) -> Result<Page<Organization>, StoreError> {
        self.search(query, org_from_row).await
    }

    async fn update_org(&self, org: &Organization) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE organizations
            SET name = $2, title = $3, avatar = $4, metadata = $5, state = $6, updated_at = $7
            WHERE id = $1
            ",
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.title)
        .bind(&org.avatar)
        .bind(Json(&org.metadata))
        .bind(org.state.as_str())
        .bind(org.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique("organization"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_org(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            DELETE FROM policies
            WHERE (resource_type = $1 AND resource_id = $2::text)
               OR (resource_type = $3 AND resource_id IN (SELECT id::text FROM projects WHERE org_id = $2))
               OR (resource_type = $4 AND resource_id IN (SELECT id::text FROM groups WHERE org_id = $2))
               OR (principal_type = $5 AND principal_id IN (SELECT id::text FROM groups WHERE org_id = $2))
            ",
        )
        .bind(ORGANIZATION_NAMESPACE)
        .bind(id)
        .bind(PROJECT_NAMESPACE)
        .bind(GROUP_NAMESPACE)
        .bind(GROUP_PRINCIPAL)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM preferences WHERE resource_type = $1 AND resource_id = $2")
            .bind(ORGANIZATION_NAMESPACE)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        // projects, groups and org roles cascade
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO projects (id, name, title, org_id, metadata, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.title)
        .bind(project.org_id)
        .bind(Json(&project.metadata))
        .bind(project.state.as_str())
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique("project"))?;
        Ok(())
    }

    async fn fetch_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(project_from_row).transpose()?)
    }

    async fn fetch_projects(&self, org_id: Uuid) -> Result<Vec<Project>, StoreError> {
        let rows = sqlx::query("SELECT * FROM projects WHERE org_id = $1 ORDER BY created_at")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows, project_from_row)
    }

    async fn update_project(&self, project: &Project) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE projects SET title = $2, metadata = $3, state = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(project.id)
        .bind(&project.title)
        .bind(Json(&project.metadata))
        .bind(project.state.as_str())
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_project(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM policies WHERE resource_type = $1 AND resource_id = $2")
            .bind(PROJECT_NAMESPACE)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_group(&self, group: &Group, owner: &Policy) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO groups (id, name, title, org_id, metadata, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(group.id)
        .bind(&group.name)
        .bind(&group.title)
        .bind(group.org_id)
        .bind(Json(&group.metadata))
        .bind(group.state.as_str())
        .bind(group.created_at)
        .bind(group.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(conflict_on_unique("group"))?;
        insert_policy_tx(&mut tx, owner).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_group(&self, id: Uuid) -> Result<Option<Group>, StoreError> {
        let row = sqlx::query("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(group_from_row).transpose()?)
    }

    async fn fetch_groups(&self, org_id: Uuid) -> Result<Vec<Group>, StoreError> {
        let rows = sqlx::query("SELECT * FROM groups WHERE org_id = $1 ORDER BY created_at")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows, group_from_row)
    }

    async fn delete_group(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            DELETE FROM policies
            WHERE (resource_type = $1 AND resource_id = $3)
               OR (principal_type = $2 AND principal_id = $3)
            ",
        )
        .bind(GROUP_NAMESPACE)
        .bind(GROUP_PRINCIPAL)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_permission(&self, permission: &Permission) -> Result<Permission, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO permissions (id, name, namespace, slug, key, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (slug) DO UPDATE
            SET metadata = EXCLUDED.metadata, updated_at = EXCLUDED.updated_at
            RETURNING *
            ",
        )
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.namespace)
        .bind(&permission.slug)
        .bind(&permission.key)
        .bind(Json(&permission.metadata))
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(permission_from_row(&row)?)
    }

    async fn fetch_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query("SELECT * FROM permissions ORDER BY namespace, name")
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows, permission_from_row)
    }

    async fn upsert_role(&self, role: &Role) -> Result<Role, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO roles (id, name, title, org_id, permissions, scopes, state, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (org_id, name) DO UPDATE
            SET title = EXCLUDED.title,
                permissions = EXCLUDED.permissions,
                scopes = EXCLUDED.scopes,
                state = EXCLUDED.state,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            ",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.title)
        .bind(role.org_id)
        .bind(&role.permissions)
        .bind(&role.scopes)
        .bind(role.state.as_str())
        .bind(Json(&role.metadata))
        .bind(role.created_at)
        .bind(role.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(role_from_row(&row)?)
    }

    async fn fetch_role(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn fetch_role_by_name(
        &self,
        org_id: Option<Uuid>,
        name: &str,
    ) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT * FROM roles WHERE org_id IS NOT DISTINCT FROM $1 AND name = $2")
            .bind(org_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(role_from_row).transpose()?)
    }

    async fn fetch_roles(&self, org_id: Option<Uuid>) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM roles WHERE org_id IS NOT DISTINCT FROM $1 ORDER BY created_at, name",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows, role_from_row)
    }

    async fn fetch_roles_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT * FROM roles WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        decode_all(&rows, role_from_row)
    }

    async fn insert_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_policy_tx(&mut tx, policy).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError> {
        let row = sqlx::query("SELECT * FROM policies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(policy_from_row).transpose()?)
    }

    async fn fetch_policies(&self, filter: &PolicyFilter) -> Result<Vec<Policy>, StoreError> {
        let mut builder = QueryBuilder::new("SELECT * FROM policies");
        push_policy_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at");
        let rows = builder.build().fetch_all(&self.pool).await?;
        decode_all(&rows, policy_from_row)
    }

    async fn delete_policy(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_policies(&self, filter: &PolicyFilter) -> Result<u64, StoreError> {
        let mut builder = QueryBuilder::new("DELETE FROM policies");
        push_policy_filter(&mut builder, filter);
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn remove_org_member(
        &self,
        org_id: Uuid,
        member: &Resource,
        owner_role: Uuid,
    ) -> Result<MemberRemoval, StoreError> {
        let mut tx = self.pool.begin().await?;
        // serializes removals with each other and with project or group inserts
        let locked = sqlx::query("SELECT id FROM organizations WHERE id = $1 FOR UPDATE")
            .bind(org_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Ok(MemberRemoval::NotMember);
        }
        let rows = sqlx::query("SELECT * FROM policies WHERE resource_type = $1 AND resource_id = $2")
            .bind(ORGANIZATION_NAMESPACE)
            .bind(org_id.to_string())
            .fetch_all(&mut *tx)
            .await?;
        let on_org = decode_all(&rows, policy_from_row)?;
        let held = on_org.iter().map(|policy| (&policy.principal, policy.role_id));
        if let Some(rejected) = MemberRemoval::check(held, member, owner_role) {
            return Ok(rejected);
        }

        let result = sqlx::query(
            r"
            DELETE FROM policies
            WHERE principal_type = $1 AND principal_id = $2
              AND ((resource_type = $3 AND resource_id = $4::text)
                OR (resource_type = $5 AND resource_id IN (SELECT id::text FROM projects WHERE org_id = $4))
                OR (resource_type = $6 AND resource_id IN (SELECT id::text FROM groups WHERE org_id = $4)))
            ",
        )
        .bind(&member.namespace)
        .bind(&member.id)
        .bind(ORGANIZATION_NAMESPACE)
        .bind(org_id)
        .bind(PROJECT_NAMESPACE)
        .bind(GROUP_NAMESPACE)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(MemberRemoval::Removed(result.rows_affected()))
    }

    async fn upsert_preference(&self, preference: &Preference) -> Result<Preference, StoreError> {
        let row = sqlx::query(
            r"
            INSERT INTO preferences (id, name, value, resource_type, resource_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (resource_type, resource_id, name) DO UPDATE
            SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            RETURNING *
            ",
        )
        .bind(preference.id)
        .bind(&preference.name)
        .bind(&preference.value)
        .bind(&preference.resource_type)
        .bind(&preference.resource_id)
        .bind(preference.created_at)
        .bind(preference.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(preference_from_row(&row)?)
    }

    async fn fetch_preferences(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Preference>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM preferences WHERE resource_type = $1 AND resource_id = $2 ORDER BY name",
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&rows, preference_from_row)
    }

    async fn upsert_plan(&self, plan: &Plan) -> Result<Plan, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut product_ids = Vec::with_capacity(plan.products.len());
        for product in &plan.products {
            let product_id: Uuid = sqlx::query_scalar(
                r"
                INSERT INTO products (id, name, title, description, behavior, metadata, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (name) DO UPDATE
                SET title = EXCLUDED.title,
                    description = EXCLUDED.description,
                    behavior = EXCLUDED.behavior,
                    metadata = EXCLUDED.metadata,
                    updated_at = EXCLUDED.updated_at
                RETURNING id
                ",
            )
            .bind(product.id)
            .bind(&product.name)
            .bind(&product.title)
            .bind(&product.description)
            .bind(product.behavior.as_str())
            .bind(Json(&product.metadata))
            .bind(product.created_at)
            .bind(product.updated_at)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM prices WHERE product_id = $1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            for (index, price) in product.prices.iter().enumerate() {
                sqlx::query(
                    r"
                    INSERT INTO prices (id, product_id, position, name, interval, amount, currency, usage_type, billing_scheme, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    ",
                )
                .bind(price.id)
                .bind(product_id)
                .bind(position(index))
                .bind(&price.name)
                .bind(&price.interval)
                .bind(price.amount)
                .bind(&price.currency)
                .bind(price.usage_type.as_str())
                .bind(price.billing_scheme.as_str())
                .bind(Json(&price.metadata))
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM features WHERE product_id = $1")
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
            for (index, feature) in product.features.iter().enumerate() {
                sqlx::query(
                    r"
                    INSERT INTO features (id, product_id, position, name, title, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ",
                )
                .bind(feature.id)
                .bind(product_id)
                .bind(position(index))
                .bind(&feature.name)
                .bind(&feature.title)
                .bind(Json(&feature.metadata))
                .execute(&mut *tx)
                .await?;
            }
            product_ids.push(product_id);
        }

        let plan_id: Uuid = sqlx::query_scalar(
            r"
            INSERT INTO plans (id, name, title, description, interval, trial_days, on_start_credits, state, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (name) DO UPDATE
            SET title = EXCLUDED.title,
                description = EXCLUDED.description,
                interval = EXCLUDED.interval,
                trial_days = EXCLUDED.trial_days,
                on_start_credits = EXCLUDED.on_start_credits,
                state = EXCLUDED.state,
                metadata = EXCLUDED.metadata,
                updated_at = EXCLUDED.updated_at
            RETURNING id
            ",
        )
        .bind(plan.id)
        .bind(&plan.name)
        .bind(&plan.title)
        .bind(&plan.description)
        .bind(&plan.interval)
        .bind(plan.trial_days)
        .bind(plan.on_start_credits)
        .bind(plan.state.as_str())
        .bind(Json(&plan.metadata))
        .bind(plan.created_at)
        .bind(plan.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM plan_products WHERE plan_id = $1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await?;
        for (index, product_id) in product_ids.iter().enumerate() {
            sqlx::query("INSERT INTO plan_products (plan_id, product_id, position) VALUES ($1, $2, $3)")
                .bind(plan_id)
                .bind(product_id)
                .bind(position(index))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.fetch_plan(plan_id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn fetch_plan(&self, id: Uuid) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_plan(plan_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn fetch_plan_by_name(&self, name: &str) -> Result<Option<Plan>, StoreError> {
        let row = sqlx::query("SELECT * FROM plans WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate_plan(plan_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn fetch_plans(&self) -> Result<Vec<Plan>, StoreError> {
        let rows = sqlx::query("SELECT * FROM plans ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await?;
        let mut plans = Vec::with_capacity(rows.len());
        for plan in decode_all(&rows, plan_from_row)? {
            plans.push(self.hydrate_plan(plan).await?);
        }
        Ok(plans)
    }

    async fn fetch_products(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query("SELECT * FROM products ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await?;
        self.hydrate_products(decode_all(&rows, product_from_row)?)
            .await
    }

    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let target = record.target.as_ref();
        sqlx::query(
            r"
            INSERT INTO audit_records (
                id, idempotency_key, event,
                actor_id, actor_type, actor_name,
                resource_id, resource_type, resource_name,
                target_id, target_type, target_name,
                org_id, metadata, occurred_at, created_at, content_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ",
        )
        .bind(record.id)
        .bind(&record.idempotency_key)
        .bind(&record.event)
        .bind(&record.actor.id)
        .bind(&record.actor.kind)
        .bind(&record.actor.name)
        .bind(&record.resource.id)
        .bind(&record.resource.kind)
        .bind(&record.resource.name)
        .bind(target.map(|entity| entity.id.as_str()))
        .bind(target.map(|entity| entity.kind.as_str()))
        .bind(target.map(|entity| entity.name.as_str()))
        .bind(record.org_id)
        .bind(Json(&record.metadata))
        .bind(record.occurred_at)
        .bind(record.created_at)
        .bind(&record.content_hash)
        .execute(&self.pool)
        .await
        .map_err(conflict_on_unique("audit record"))?;
        Ok(())
    }

    async fn fetch_audit_record_by_key(
        &self,
        key: &str,
    ) -> Result<Option<AuditRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM audit_records WHERE idempotency_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(audit_from_row).transpose()?)
    }

    async fn search_audit_records(
        &self,
        query: &Compiled,
    ) -> Result<Page<AuditRecord>, StoreError> {
        self.search(query, audit_from_row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[derive(Debug)]
    struct FakeDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("fake database error")
        }
    }

    impl StdError for FakeDbError {}

    impl sqlx::error::DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    #[test]
    fn unique_violations_become_conflicts() {
        let err = sqlx::Error::Database(Box::new(FakeDbError { code: Some("23505") }));
        assert!(is_unique_violation(&err));
        let mapped = conflict_on_unique("organization")(err);
        assert!(matches!(mapped, StoreError::Conflict(message) if message == "organization already exists"));

        let err = sqlx::Error::Database(Box::new(FakeDbError { code: Some("23503") }));
        assert!(matches!(conflict_on_unique("organization")(err), StoreError::Database(_)));
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn policy_filters_bind_composite_keys() {
        let filter = PolicyFilter {
            resources: vec![Resource::new(ORGANIZATION_NAMESPACE, "o1")],
            principals: vec![Resource::new(USER_PRINCIPAL, "u1")],
            role_id: Some(Uuid::nil()),
        };
        let mut builder = QueryBuilder::new("SELECT * FROM policies");
        push_policy_filter(&mut builder, &filter);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM policies WHERE TRUE AND resource_type || ':' || resource_id = ANY($1) \
             AND principal_type || ':' || principal_id = ANY($2) AND role_id = $3"
        );
    }

    #[test]
    fn schema_splits_into_statements() {
        let statements = split_sql_statements(SCHEMA_SQL);
        assert_eq!(statements.len(), 17);
        assert!(statements.iter().all(|statement| statement.ends_with(';')));
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS users"));
    }
}
