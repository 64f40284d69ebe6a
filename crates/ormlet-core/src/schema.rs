//! Schema and relation metadata, plus the entity registry.
//!
//! A [`Schema`] describes one record type: its scalar fields, which of them
//! form the primary key, and the navigational relations to other schemas.
//! Schemas are registered in a [`Registry`] that is shared (behind `Arc`) by
//! queries, sessions and store adapters.

use crate::error::{Error, Result};
use crate::row::ColumnInfo;
use crate::types::SqlType;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Identifier rule for schema, field and relation names.
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn is_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    match IDENT.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).ok()) {
        Some(regex) => regex.is_match(name),
        None => {
            tracing::warn!(
                pattern = IDENTIFIER_PATTERN,
                "identifier pattern failed to compile, rejecting name"
            );
            false
        }
    }
}

/// A scalar field of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Value is assigned by the store on insert (auto-increment keys).
    pub generated: bool,
    pub unique: bool,
}

impl FieldDef {
    /// A non-nullable field of the given type.
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            primary_key: false,
            generated: false,
            unique: false,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark the field as store-generated.
    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Cardinality of a navigational relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Single related record, keyed from either side.
    OneToOne,
    /// Many `products` belong to one `category`.
    #[default]
    ManyToOne,
    /// One `category` has many `products`.
    OneToMany,
    /// `employees` and `territories` through a link table.
    ManyToMany,
}

impl RelationKind {
    /// Does navigating this relation yield a collection?
    pub const fn is_collection(self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// Link table joining the two sides of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    /// Link table name (e.g. `"employee_territories"`).
    pub table: String,
    /// Column matching the owning side's local key.
    pub local_column: String,
    /// Column matching the target side's remote key.
    pub remote_column: String,
}

impl LinkTable {
    pub fn new(
        table: impl Into<String>,
        local_column: impl Into<String>,
        remote_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_column: local_column.into(),
            remote_column: remote_column.into(),
        }
    }
}

/// A navigational relation from one schema to another.
///
/// Related records are those whose `remote_key` equals the owner's
/// `local_key` (through the link table for many-to-many).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    /// Target schema name.
    pub target: String,
    pub kind: RelationKind,
    /// Column on the owning schema.
    pub local_key: String,
    /// Column on the target schema.
    pub remote_key: String,
    pub link: Option<LinkTable>,
}

impl RelationDef {
    /// Reference through a foreign key stored on the owning schema.
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::ManyToOne,
            local_key: foreign_key.into(),
            remote_key: target_key.into(),
            link: None,
        }
    }

    /// Collection whose elements carry a foreign key to the owner.
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        target_foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::OneToMany,
            local_key: local_key.into(),
            remote_key: target_foreign_key.into(),
            link: None,
        }
    }

    /// Single record whose foreign key points at the owner.
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        remote_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::OneToOne,
            local_key: local_key.into(),
            remote_key: remote_key.into(),
            link: None,
        }
    }

    /// Collection reached through a link table.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
        link: LinkTable,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind: RelationKind::ManyToMany,
            local_key: local_key.into(),
            remote_key: target_key.into(),
            link: Some(link),
        }
    }

    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }
}

/// Shape of one record type.
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
    primary_key: Vec<usize>,
    field_index: HashMap<String, usize>,
    columns: Arc<ColumnInfo>,
}

impl Schema {
    /// Start building a schema.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.field_index(name).map(|i| &self.fields[i])
    }

    /// Position of a field in record values and rows.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.field_index.get(name).copied()
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Positions of the primary-key fields.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    /// Names of the primary-key fields.
    pub fn primary_key_names(&self) -> Vec<&str> {
        self.primary_key
            .iter()
            .map(|&i| self.fields[i].name.as_str())
            .collect()
    }

    /// Column metadata matching the field order, shared by all rows.
    pub fn columns(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }
}

/// Consuming builder for [`Schema`].
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate and freeze the schema.
    ///
    /// Rejects invalid identifiers, duplicate names, a missing primary key,
    /// generated fields that are not integers, and relations whose local key
    /// is not a field of this schema.
    pub fn build(self) -> Result<Schema> {
        if !is_identifier(&self.name) {
            return Err(Error::invalid_schema(format!(
                "'{}' is not a valid schema name",
                self.name
            )));
        }

        let mut field_index = HashMap::new();
        for (i, field) in self.fields.iter().enumerate() {
            if !is_identifier(&field.name) {
                return Err(Error::invalid_schema(format!(
                    "'{}.{}' is not a valid field name",
                    self.name, field.name
                )));
            }
            if field_index.insert(field.name.clone(), i).is_some() {
                return Err(Error::invalid_schema(format!(
                    "duplicate field '{}' on '{}'",
                    field.name, self.name
                )));
            }
            if field.generated && !field.ty.is_integer() {
                return Err(Error::invalid_schema(format!(
                    "generated field '{}.{}' must be an integer",
                    self.name, field.name
                )));
            }
        }

        let primary_key: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
            .collect();
        if primary_key.is_empty() {
            return Err(Error::invalid_schema(format!(
                "schema '{}' has no primary key",
                self.name
            )));
        }

        for relation in &self.relations {
            if !is_identifier(&relation.name) {
                return Err(Error::invalid_schema(format!(
                    "'{}.{}' is not a valid relation name",
                    self.name, relation.name
                )));
            }
            if field_index.contains_key(&relation.name) {
                return Err(Error::invalid_schema(format!(
                    "relation '{}' on '{}' shadows a field",
                    relation.name, self.name
                )));
            }
            if !field_index.contains_key(&relation.local_key) {
                return Err(Error::invalid_schema(format!(
                    "relation '{}.{}' uses unknown local key '{}'",
                    self.name, relation.name, relation.local_key
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for relation in &self.relations {
            if !seen.insert(relation.name.as_str()) {
                return Err(Error::invalid_schema(format!(
                    "duplicate relation '{}' on '{}'",
                    relation.name, self.name
                )));
            }
        }

        let columns = Arc::new(ColumnInfo::new(
            self.fields.iter().map(|f| f.name.clone()).collect(),
        ));

        Ok(Schema {
            name: self.name,
            fields: self.fields,
            relations: self.relations,
            primary_key,
            field_index,
            columns,
        })
    }
}

/// The entity registry: every schema a session or store can work with.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema (consuming builder style).
    pub fn register(mut self, schema: Schema) -> Result<Self> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(Error::invalid_schema(format!(
                "schema '{name}' registered twice"
            )));
        }
        self.schemas.insert(name, Arc::new(schema));
        Ok(self)
    }

    /// Look up a schema by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    /// Like `get`, failing with `Error::Schema` for unknown names.
    pub fn require(&self, name: &str) -> Result<&Arc<Schema>> {
        self.get(name).ok_or_else(|| Error::unknown_schema(name))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Check cross-schema references: relation targets, remote keys and
    /// link tables must all exist.
    pub fn validate(&self) -> Result<()> {
        for schema in self.schemas.values() {
            for relation in schema.relations() {
                let target = self.get(&relation.target).ok_or_else(|| {
                    Error::invalid_schema(format!(
                        "relation '{}.{}' targets unknown schema '{}'",
                        schema.name(),
                        relation.name,
                        relation.target
                    ))
                })?;
                if target.field(&relation.remote_key).is_none() {
                    return Err(Error::invalid_schema(format!(
                        "relation '{}.{}' uses unknown remote key '{}.{}'",
                        schema.name(),
                        relation.name,
                        relation.target,
                        relation.remote_key
                    )));
                }
                match (&relation.link, relation.kind) {
                    (Some(link), RelationKind::ManyToMany) => {
                        let link_schema = self.get(&link.table).ok_or_else(|| {
                            Error::invalid_schema(format!(
                                "relation '{}.{}' uses unknown link table '{}'",
                                schema.name(),
                                relation.name,
                                link.table
                            ))
                        })?;
                        for column in [&link.local_column, &link.remote_column] {
                            if link_schema.field(column).is_none() {
                                return Err(Error::invalid_schema(format!(
                                    "link table '{}' has no column '{}'",
                                    link.table, column
                                )));
                            }
                        }
                    }
                    (None, RelationKind::ManyToMany) => {
                        return Err(Error::invalid_schema(format!(
                            "many-to-many relation '{}.{}' needs a link table",
                            schema.name(),
                            relation.name
                        )));
                    }
                    (Some(_), _) => {
                        return Err(Error::invalid_schema(format!(
                            "only many-to-many relations take a link table ('{}.{}')",
                            schema.name(),
                            relation.name
                        )));
                    }
                    (None, _) => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Schema {
        Schema::builder("categories")
            .field(FieldDef::new("category_id", SqlType::Integer).primary_key().generated())
            .field(FieldDef::new("category_name", SqlType::Text))
            .relation(RelationDef::one_to_many(
                "products",
                "products",
                "category_id",
                "category_id",
            ))
            .build()
            .unwrap()
    }

    fn products() -> Schema {
        Schema::builder("products")
            .field(FieldDef::new("product_id", SqlType::Integer).primary_key().generated())
            .field(FieldDef::new("product_name", SqlType::Text))
            .field(FieldDef::new("category_id", SqlType::Integer).nullable())
            .relation(RelationDef::many_to_one(
                "category",
                "categories",
                "category_id",
                "category_id",
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn builder_indexes_fields_and_keys() {
        let schema = products();
        assert_eq!(schema.field_index("category_id"), Some(2));
        assert_eq!(schema.primary_key_names(), vec!["product_id"]);
        assert!(schema.relation("category").is_some_and(|r| !r.is_collection()));
        assert_eq!(schema.columns().len(), 3);
    }

    #[test]
    fn builder_rejects_bad_definitions() {
        let no_key = Schema::builder("regions")
            .field(FieldDef::new("region_description", SqlType::Text))
            .build();
        assert!(matches!(no_key, Err(Error::Schema(_))));

        let bad_name = Schema::builder("order details")
            .field(FieldDef::new("id", SqlType::Integer).primary_key())
            .build();
        assert!(bad_name.is_err());

        let bad_generated = Schema::builder("customers")
            .field(FieldDef::new("customer_id", SqlType::Text).primary_key().generated())
            .build();
        assert!(bad_generated.is_err());

        let bad_relation = Schema::builder("products")
            .field(FieldDef::new("product_id", SqlType::Integer).primary_key())
            .relation(RelationDef::many_to_one(
                "supplier",
                "suppliers",
                "supplier_id",
                "supplier_id",
            ))
            .build();
        assert!(bad_relation.is_err());
    }

    #[test]
    fn registry_validates_targets() {
        let registry = Registry::new()
            .register(products())
            .unwrap()
            .register(categories())
            .unwrap();
        assert!(registry.validate().is_ok());

        let dangling = Registry::new().register(products()).unwrap();
        assert!(dangling.validate().is_err());
        assert!(matches!(dangling.require("orders"), Err(Error::Schema(_))));
    }

    #[test]
    fn registry_rejects_duplicates() {
        let result = Registry::new()
            .register(products())
            .unwrap()
            .register(products());
        assert!(result.is_err());
    }
}
