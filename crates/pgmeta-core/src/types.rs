use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Sentinel accepted for type lists, schema lists, and name patterns.
pub const MATCH_ALL: &str = "ALL";

/// Synthetic schema bucket for database-level objects (publications and
/// subscriptions), which have no owning schema of their own.
pub const DATABASE_SCHEMA: &str = "postgres";

/// Kind of database object the engine can discover and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Table,
    View,
    MaterializedView,
    Function,
    Procedure,
    Aggregate,
    Trigger,
    Index,
    Constraint,
    Sequence,
    Policy,
    Extension,
    Publication,
    Subscription,
    Rule,
}

impl ObjectType {
    /// Every recognized type, in the order they are discovered.
    pub const ALL: [ObjectType; 15] = [
        ObjectType::Table,
        ObjectType::View,
        ObjectType::MaterializedView,
        ObjectType::Function,
        ObjectType::Procedure,
        ObjectType::Aggregate,
        ObjectType::Trigger,
        ObjectType::Index,
        ObjectType::Constraint,
        ObjectType::Sequence,
        ObjectType::Policy,
        ObjectType::Extension,
        ObjectType::Publication,
        ObjectType::Subscription,
        ObjectType::Rule,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Table => "table",
            ObjectType::View => "view",
            ObjectType::MaterializedView => "materialized_view",
            ObjectType::Function => "function",
            ObjectType::Procedure => "procedure",
            ObjectType::Aggregate => "aggregate",
            ObjectType::Trigger => "trigger",
            ObjectType::Index => "index",
            ObjectType::Constraint => "constraint",
            ObjectType::Sequence => "sequence",
            ObjectType::Policy => "policy",
            ObjectType::Extension => "extension",
            ObjectType::Publication => "publication",
            ObjectType::Subscription => "subscription",
            ObjectType::Rule => "rule",
        }
    }

    /// Directory segment used when grouping exported files by type.
    pub fn plural_dir(&self) -> &'static str {
        match self {
            ObjectType::Table => "tables",
            ObjectType::View => "views",
            ObjectType::MaterializedView => "materialized_views",
            ObjectType::Function => "functions",
            ObjectType::Procedure => "procedures",
            ObjectType::Aggregate => "aggregates",
            ObjectType::Trigger => "triggers",
            ObjectType::Index => "indexes",
            ObjectType::Constraint => "constraints",
            ObjectType::Sequence => "sequences",
            ObjectType::Policy => "policies",
            ObjectType::Extension => "extensions",
            ObjectType::Publication => "publications",
            ObjectType::Subscription => "subscriptions",
            ObjectType::Rule => "rules",
        }
    }

    /// Types that nest under their owning table in the output tree when the
    /// owner is known.
    pub fn is_table_scoped(&self) -> bool {
        matches!(
            self,
            ObjectType::Trigger
                | ObjectType::Index
                | ObjectType::Constraint
                | ObjectType::Sequence
                | ObjectType::Policy
                | ObjectType::Rule
        )
    }

    /// Types that always carry an owning table; a missing owner is worth a
    /// warning. Sequences are excluded: a free-standing sequence is normal.
    pub fn expects_owner(&self) -> bool {
        matches!(
            self,
            ObjectType::Trigger
                | ObjectType::Index
                | ObjectType::Constraint
                | ObjectType::Policy
                | ObjectType::Rule
        )
    }

    /// Types discovered once per database rather than once per schema.
    pub fn is_database_scoped(&self) -> bool {
        matches!(self, ObjectType::Publication | ObjectType::Subscription)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ObjectType::ALL
            .iter()
            .find(|ty| ty.as_str() == s)
            .copied()
            .ok_or_else(|| Error::UnsupportedType(s.to_string()))
    }
}

/// One discovered database object, the unit of work for the fetch and export
/// phases. `(object_type, schema, name)` identifies an object within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub object_type: ObjectType,
    pub schema: String,
    pub name: String,
    /// Parent table for triggers, indexes, constraints, policies, rules, and
    /// owned sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_table: Option<String>,
    /// The `CREATE …` text. Present after discovery for constraints, after
    /// the fetch phase for everything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl ObjectDescriptor {
    pub fn new(
        object_type: ObjectType,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            object_type,
            schema: schema.into(),
            name: name.into(),
            owning_table: None,
            definition: None,
        }
    }

    pub fn with_owning_table(mut self, table: impl Into<String>) -> Self {
        self.owning_table = Some(table.into());
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    /// `schema.name`, the form used in failure ledgers and log lines.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Deduplication key within one export run.
    pub fn identity(&self) -> (ObjectType, &str, &str) {
        (self.object_type, self.schema.as_str(), self.name.as_str())
    }

    pub fn has_definition(&self) -> bool {
        self.definition.as_deref().is_some_and(|d| !d.is_empty())
    }
}

/// Input to the discovery planner.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Requested object types; empty means all types.
    pub types: Vec<ObjectType>,
    /// Requested schemas; empty defaults to `public`, the single element
    /// `ALL` expands to every non-system schema.
    pub schemas: Vec<String>,
    /// Regex applied to object names; empty or `ALL` matches everything.
    pub name_pattern: String,
}

impl QueryRequest {
    pub fn wants(&self, ty: ObjectType) -> bool {
        self.types.is_empty() || self.types.contains(&ty)
    }

    /// The regex source after sentinel translation.
    pub fn pattern_source(&self) -> &str {
        if self.name_pattern.is_empty() || self.name_pattern == MATCH_ALL {
            ".*"
        } else {
            &self.name_pattern
        }
    }
}

/// Error-escalation policy for the fetch and export phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Abort on the first failure, before any file is written.
    Fail,
    /// Log failures, skip the affected objects, and keep going.
    Warn,
}

impl OnError {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Fail => "fail",
            OnError::Warn => "warn",
        }
    }
}

impl FromStr for OnError {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(OnError::Fail),
            "warn" => Ok(OnError::Warn),
            other => Err(Error::InvalidPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
