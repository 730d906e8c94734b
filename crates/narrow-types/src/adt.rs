//! Closed union definitions and registry.
//!
//! A union is a closed set of variants, each identified by a discriminant tag
//! that is unique within the union and carrying its own named fields. The
//! registry is filled once per module and consulted for construction, field
//! access, narrowing and exhaustiveness.

use crate::ty::Ty;
use std::collections::{BTreeSet, HashMap};

/// Definition of a closed tagged union.
#[derive(Clone, Debug)]
pub struct UnionDef {
    /// Name of the union (e.g., "Calc")
    pub name: String,
    /// Variants in declaration order
    pub variants: Vec<VariantDef>,
}

/// One variant of a union.
#[derive(Clone, Debug)]
pub struct VariantDef {
    /// Discriminant (e.g., "add")
    pub tag: String,
    /// Fields unique to this shape
    pub fields: Vec<FieldDef>,
}

/// Field definition in a variant
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub ty: Ty,
}

impl UnionDef {
    pub fn new(name: impl Into<String>, variants: Vec<VariantDef>) -> Self {
        Self {
            name: name.into(),
            variants,
        }
    }

    /// Find a variant by tag
    pub fn find_variant(&self, tag: &str) -> Option<&VariantDef> {
        self.variants.iter().find(|v| v.tag == tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.variants.iter().map(|v| v.tag.as_str())
    }

    /// The unnarrowed type: every variant still possible.
    pub fn full_ty(&self) -> Ty {
        Ty::union_of(
            self.name.clone(),
            self.tags().map(str::to_string).collect::<BTreeSet<_>>(),
            self.variants.len(),
        )
    }

    /// The type narrowed to a single variant.
    pub fn variant_ty(&self, tag: &str) -> Ty {
        Ty::variant(self.name.clone(), tag, self.variants.len())
    }
}

impl VariantDef {
    pub fn new(tag: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self {
            tag: tag.into(),
            fields,
        }
    }

    /// A variant with no fields
    pub fn unit(tag: impl Into<String>) -> Self {
        Self::new(tag, vec![])
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: Ty) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Registry of all union definitions
#[derive(Clone, Debug, Default)]
pub struct UnionRegistry {
    unions: HashMap<String, UnionDef>,
}

impl UnionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            unions: HashMap::new(),
        }
    }

    /// Register a union definition
    ///
    /// Returns an error if a union with the same name already exists.
    pub fn register(&mut self, def: UnionDef) -> Result<(), String> {
        if self.unions.contains_key(&def.name) {
            return Err(format!("Duplicate type definition: {}", def.name));
        }
        self.unions.insert(def.name.clone(), def);
        Ok(())
    }

    /// Look up a union by name
    pub fn get(&self, name: &str) -> Option<&UnionDef> {
        self.unions.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut UnionDef> {
        self.unions.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.unions.contains_key(name)
    }

    /// Registered union names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.unions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Type of `field` on every variant of `ty`'s residual.
    ///
    /// Succeeds only if each remaining variant declares the field with the
    /// same type, so access is valid no matter which variant is present.
    pub fn field_ty(&self, ty: &crate::ty::UnionTy, field: &str) -> Option<Ty> {
        let def = self.get(&ty.name)?;
        let mut found: Option<&Ty> = None;
        for tag in &ty.variants {
            let f = def.find_variant(tag)?.field(field)?;
            match found {
                Some(prev) if prev != &f.ty => return None,
                _ => found = Some(&f.ty),
            }
        }
        found.cloned()
    }
}
