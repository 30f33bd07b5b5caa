//! In-memory metamodel and security-context contracts.
//!
//! The compiler and evaluator never talk to a live object-relational
//! runtime; they consume a registry of entity types and attributes built
//! up front by the embedding layer, plus a map of security aliases
//! (`CURRENT_PRINCIPAL`, `CURRENT_ROLES`, ...) to runtime values.

use std::collections::BTreeMap;

use crate::value::Value;

/// Conventional security alias for the authenticated principal.
pub const CURRENT_PRINCIPAL: &str = "CURRENT_PRINCIPAL";
/// Conventional security alias for the principal's role set.
pub const CURRENT_ROLES: &str = "CURRENT_ROLES";
/// Conventional security alias for the active tenant.
pub const CURRENT_TENANT: &str = "CURRENT_TENANT";

/// The persistence kind of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Basic,
    Embedded,
    /// Single-valued association to another entity.
    Association,
    /// Collection-valued association or element collection.
    Collection,
    /// Map-valued association; carries a key type as well.
    Map,
}

/// One declared attribute of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: String,
    kind: AttributeKind,
    /// Element / target entity type, for non-basic attributes.
    target_type: Option<String>,
    /// Key type, for map attributes.
    key_type: Option<String>,
}

impl Attribute {
    pub fn basic(name: impl Into<String>) -> Attribute {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Basic,
            target_type: None,
            key_type: None,
        }
    }

    pub fn embedded(name: impl Into<String>, target: impl Into<String>) -> Attribute {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Embedded,
            target_type: Some(target.into()),
            key_type: None,
        }
    }

    pub fn association(name: impl Into<String>, target: impl Into<String>) -> Attribute {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Association,
            target_type: Some(target.into()),
            key_type: None,
        }
    }

    pub fn collection(name: impl Into<String>, element: impl Into<String>) -> Attribute {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Collection,
            target_type: Some(element.into()),
            key_type: None,
        }
    }

    pub fn map(
        name: impl Into<String>,
        key: impl Into<String>,
        element: impl Into<String>,
    ) -> Attribute {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Map,
            target_type: Some(element.into()),
            key_type: Some(key.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    pub fn target_type(&self) -> Option<&str> {
        self.target_type.as_deref()
    }

    pub fn key_type(&self) -> Option<&str> {
        self.key_type.as_deref()
    }
}

/// One managed entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: String,
    class_name: String,
    abstract_type: bool,
    supertypes: Vec<String>,
    attributes: BTreeMap<String, Attribute>,
}

impl EntityType {
    /// A concrete entity whose class name equals its entity name.
    pub fn new(name: impl Into<String>) -> EntityType {
        let name = name.into();
        EntityType {
            class_name: name.clone(),
            name,
            abstract_type: false,
            supertypes: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Set the fully-qualified class name (when it differs from the
    /// entity name).
    pub fn with_class(mut self, class_name: impl Into<String>) -> EntityType {
        self.class_name = class_name.into();
        self
    }

    /// Mark the type as abstract / an interface: FROM-clause roots of this
    /// type expand to one binding per concrete subtype.
    pub fn abstract_type(mut self) -> EntityType {
        self.abstract_type = true;
        self
    }

    /// Declare a supertype (by entity or class name).
    pub fn extends(mut self, supertype: impl Into<String>) -> EntityType {
        self.supertypes.push(supertype.into());
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> EntityType {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_type
    }

    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }
}

/// The registry of managed entity types.
///
/// Deterministic iteration order (a `BTreeMap` keyed by entity name) keeps
/// subtype expansion and compiled output stable across runs.
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: BTreeMap<String, EntityType>,
}

impl Metamodel {
    pub fn new() -> Metamodel {
        Metamodel::default()
    }

    pub fn with_entity(mut self, entity: EntityType) -> Metamodel {
        self.add_entity(entity);
        self
    }

    pub fn add_entity(&mut self, entity: EntityType) {
        self.entities.insert(entity.name.clone(), entity);
    }

    /// Look up by entity name.
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.get(name)
    }

    /// Look up by fully-qualified class name.
    pub fn entity_by_class(&self, class_name: &str) -> Option<&EntityType> {
        self.entities
            .values()
            .find(|entity| entity.class_name == class_name)
    }

    /// Resolve a FROM-clause type reference: class name first, then
    /// entity name.
    pub fn resolve(&self, name: &str) -> Option<&EntityType> {
        self.entity_by_class(name).or_else(|| self.entity(name))
    }

    /// Whether `subtype` is `supertype` or transitively extends it.
    /// Either side may be named by entity name or class name.
    pub fn is_assignable(&self, supertype: &str, subtype: &str) -> bool {
        let Some(supertype) = self.resolve(supertype) else {
            return false;
        };
        let Some(subtype) = self.resolve(subtype) else {
            return false;
        };
        if subtype.name == supertype.name {
            return true;
        }
        subtype.supertypes.iter().any(|parent| {
            self.resolve(parent)
                .is_some_and(|parent| self.is_assignable(&supertype.name, &parent.name))
        })
    }

    /// All concrete entity types assignable to the named type, the type
    /// itself included when it is concrete.
    pub fn entities_assignable_to(&self, name: &str) -> Vec<&EntityType> {
        self.entities
            .values()
            .filter(|entity| !entity.abstract_type && self.is_assignable(name, &entity.name))
            .collect()
    }

    /// Whether either type is assignable to the other. Access rules use
    /// this relaxed test: a rule for a supertype restricts its subtypes,
    /// and a rule for a subtype may apply to a value queried through a
    /// supertype.
    pub fn may_be_assignable(&self, left: &str, right: &str) -> bool {
        self.is_assignable(left, right) || self.is_assignable(right, left)
    }
}

/// A value exposed by the security context under one alias.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityValue {
    /// A single value, bound as a named parameter on injection.
    Single(Value),
    /// A value set, expanded into an OR-chain of equalities on injection.
    Set(Vec<Value>),
}

/// The aliases an access rule may reference and their runtime values.
#[derive(Debug, Clone, Default)]
pub struct SecurityContext {
    values: BTreeMap<String, SecurityValue>,
}

impl SecurityContext {
    pub fn new() -> SecurityContext {
        SecurityContext::default()
    }

    pub fn with_single(mut self, alias: impl Into<String>, value: Value) -> SecurityContext {
        self.values
            .insert(alias.into(), SecurityValue::Single(value));
        self
    }

    pub fn with_set(mut self, alias: impl Into<String>, values: Vec<Value>) -> SecurityContext {
        self.values.insert(alias.into(), SecurityValue::Set(values));
        self
    }

    pub fn value(&self, alias: &str) -> Option<&SecurityValue> {
        self.values.get(alias)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}
