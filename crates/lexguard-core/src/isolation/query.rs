//! Query descriptors and tenant predicate injection

use lexguard_common::{SecurityError, SecurityResult, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TENANT_COLUMN: &str = "tenant_id";
pub const ORGANIZATION_COLUMN: &str = "organization_id";

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    In,
}

impl FilterOp {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::In => "IN",
        }
    }
}

/// Single predicate; predicates of a filter list are conjoined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    fn targets(&self, column: &str) -> bool {
        self.column == column || self.column.rsplit('.').next() == Some(column)
    }
}

/// Inner join with its own filter list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub table: String,
    pub alias: Option<String>,
    pub left_column: String,
    pub right_column: String,
    pub filters: Vec<Filter>,
}

impl Join {
    pub fn inner(table: impl Into<String>, left_column: impl Into<String>, right_column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            left_column: left_column.into(),
            right_column: right_column.into(),
            filters: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Structured SELECT handed to the relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub table: String,
    pub alias: Option<String>,
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub joins: Vec<Join>,
    pub order_by: Vec<(String, bool)>,
    pub limit: Option<u64>,
}

impl QueryDescriptor {
    pub fn select(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            filters: Vec::new(),
            joins: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Replace every tenant and organization predicate with the given scope,
    /// on the root and on each join. Returns the descriptor and the number of
    /// stripped predicates that disagreed with the scope.
    pub(crate) fn scoped_to(mut self, tenant_id: &TenantId, organization_id: &str) -> (Self, usize) {
        let tenant = Value::from(tenant_id.as_str());
        let organization = Value::from(organization_id);

        let mut conflicts = strip_scope(&mut self.filters, &tenant, &organization);
        let root = self.qualifier().to_string();
        push_scope(&mut self.filters, &root, &tenant, &organization);

        for join in &mut self.joins {
            conflicts += strip_scope(&mut join.filters, &tenant, &organization);
            let qualifier = join.qualifier().to_string();
            push_scope(&mut join.filters, &qualifier, &tenant, &organization);
        }
        (self, conflicts)
    }

    /// Render a parameterized SELECT with `$n` placeholders.
    pub fn to_sql(&self) -> SecurityResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut sql = String::from("SELECT ");

        if self.columns.is_empty() {
            sql.push('*');
        } else {
            for (i, column) in self.columns.iter().enumerate() {
                check_identifier(column)?;
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(column);
            }
        }

        check_identifier(&self.table)?;
        sql.push_str(" FROM ");
        sql.push_str(&self.table);
        if let Some(alias) = &self.alias {
            check_identifier(alias)?;
            sql.push_str(" AS ");
            sql.push_str(alias);
        }

        for join in &self.joins {
            check_identifier(&join.table)?;
            check_identifier(&join.left_column)?;
            check_identifier(&join.right_column)?;
            sql.push_str(" JOIN ");
            sql.push_str(&join.table);
            if let Some(alias) = &join.alias {
                check_identifier(alias)?;
                sql.push_str(" AS ");
                sql.push_str(alias);
            }
            sql.push_str(&format!(" ON {} = {}", join.left_column, join.right_column));
            for filter in &join.filters {
                sql.push_str(" AND ");
                render_filter(filter, &mut sql, &mut params)?;
            }
        }

        for (i, filter) in self.filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            render_filter(filter, &mut sql, &mut params)?;
        }

        for (i, (column, ascending)) in self.order_by.iter().enumerate() {
            check_identifier(column)?;
            sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            sql.push_str(column);
            sql.push_str(if *ascending { " ASC" } else { " DESC" });
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        Ok((sql, params))
    }
}

fn strip_scope(filters: &mut Vec<Filter>, tenant: &Value, organization: &Value) -> usize {
    let mut conflicts = 0;
    filters.retain(|f| {
        let expected = if f.targets(TENANT_COLUMN) {
            tenant
        } else if f.targets(ORGANIZATION_COLUMN) {
            organization
        } else {
            return true;
        };
        if f.op != FilterOp::Eq || &f.value != expected {
            conflicts += 1;
        }
        false
    });
    conflicts
}

fn push_scope(filters: &mut Vec<Filter>, qualifier: &str, tenant: &Value, organization: &Value) {
    filters.push(Filter::eq(format!("{}.{}", qualifier, TENANT_COLUMN), tenant.clone()));
    filters.push(Filter::eq(format!("{}.{}", qualifier, ORGANIZATION_COLUMN), organization.clone()));
}

fn render_filter(filter: &Filter, sql: &mut String, params: &mut Vec<Value>) -> SecurityResult<()> {
    check_identifier(&filter.column)?;
    sql.push_str(&filter.column);
    sql.push(' ');
    sql.push_str(filter.op.sql());

    if filter.op == FilterOp::In {
        let values = match &filter.value {
            Value::Array(values) if !values.is_empty() => values,
            _ => {
                return Err(SecurityError::InvalidInput(format!(
                    "IN filter on {} needs a non-empty array",
                    filter.column
                )))
            }
        };
        sql.push_str(" (");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            params.push(value.clone());
            sql.push_str(&format!("${}", params.len()));
        }
        sql.push(')');
    } else {
        params.push(filter.value.clone());
        sql.push_str(&format!(" ${}", params.len()));
    }
    Ok(())
}

/// `name` or `qualifier.name`, ASCII word characters only
fn check_identifier(ident: &str) -> SecurityResult<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = ident.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(SecurityError::InvalidInput(format!("invalid identifier '{}'", ident)))
    }
}
