//! Cross-product flattening.
//!
//! A shape with more than one tag (a channel and a format, say) can be
//! folded into one flat union whose tags enumerate every combination that
//! can occur (`email_html`, `email_plain`, `sms`). A single-discriminant
//! switch over the flat union then gets the ordinary one-variant-per-case
//! proof.
//!
//! Two sources of sub-tags are folded:
//! - a variant field whose type is a union: the field is replaced by the
//!   fields of whichever sub-variant it holds, so only that variant is
//!   multiplied out;
//! - several independent unions named together: every combination of
//!   their (already expanded) variants.

use crate::adt::{FieldDef, UnionDef, UnionRegistry, VariantDef};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;

/// Upper bound on the number of combinations a flattening may produce
pub const MAX_FLATTENED_COMBINATIONS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlattenError {
    #[error("nothing to flatten: name at least one union")]
    Empty,
    #[error("unknown union `{name}` (declared: {declared})")]
    UnknownUnion { name: String, declared: String },
    #[error("flattening produces {count} combinations (max {max})")]
    TooManyCombinations { count: usize, max: usize },
    #[error("combined tag `{0}` is produced by more than one combination")]
    TagCollision(String),
    #[error("field `{field}` appears in more than one component of `{tag}`")]
    FieldCollision { tag: String, field: String },
    #[error("union `{0}` contains itself and cannot be flattened")]
    Recursive(String),
}

/// Build the flat union named `name` from `unions`.
///
/// Each union is first expanded through its union-typed fields; the
/// expanded variant lists are then combined. Tags are the component tags
/// joined with `_` in order; each combined variant carries the fields of
/// all its components.
pub fn flatten(
    registry: &UnionRegistry,
    unions: &[&str],
    name: &str,
) -> Result<UnionDef, FlattenError> {
    if unions.is_empty() {
        return Err(FlattenError::Empty);
    }
    let mut parts = Vec::with_capacity(unions.len());
    for &u in unions {
        let def = registry.get(u).ok_or_else(|| FlattenError::UnknownUnion {
            name: u.to_string(),
            declared: registry.names().join(", "),
        })?;
        parts.push(expand(registry, def, None, &mut Vec::new())?);
    }

    // Start with the empty combination and extend it one union at a time.
    let mut combos = vec![VariantDef::unit("")];
    for part in &parts {
        combos = product(&combos, part)?;
    }

    let mut tags = HashSet::with_capacity(combos.len());
    for v in &combos {
        if !tags.insert(v.tag.as_str()) {
            return Err(FlattenError::TagCollision(v.tag.clone()));
        }
    }
    Ok(UnionDef::new(name, combos))
}

/// Variants of `def` (restricted to `only`, when given) with every
/// union-typed field multiplied out.
fn expand(
    registry: &UnionRegistry,
    def: &UnionDef,
    only: Option<&BTreeSet<String>>,
    active: &mut Vec<String>,
) -> Result<Vec<VariantDef>, FlattenError> {
    if active.contains(&def.name) {
        return Err(FlattenError::Recursive(def.name.clone()));
    }
    active.push(def.name.clone());

    let mut out = Vec::new();
    for v in &def.variants {
        if only.is_some_and(|tags| !tags.contains(&v.tag)) {
            continue;
        }
        let mut combos = vec![VariantDef::unit(v.tag.clone())];
        for f in &v.fields {
            let nested = f
                .ty
                .as_union()
                .and_then(|u| registry.get(&u.name).map(|d| (d, &u.variants)));
            match nested {
                Some((sub, tags)) => {
                    let subs = expand(registry, sub, Some(tags), active)?;
                    combos = product(&combos, &subs)?;
                }
                None => {
                    for c in &mut combos {
                        push_field(c, f)?;
                    }
                }
            }
        }
        out.extend(combos);
        if out.len() > MAX_FLATTENED_COMBINATIONS {
            return Err(too_many(out.len()));
        }
    }

    active.pop();
    Ok(out)
}

/// Every pairing of a variant from `left` with one from `right`.
fn product(left: &[VariantDef], right: &[VariantDef]) -> Result<Vec<VariantDef>, FlattenError> {
    let count = left.len().saturating_mul(right.len());
    if count > MAX_FLATTENED_COMBINATIONS {
        return Err(too_many(count));
    }
    let mut out = Vec::with_capacity(count);
    for l in left {
        for r in right {
            let tag = if l.tag.is_empty() {
                r.tag.clone()
            } else {
                format!("{}_{}", l.tag, r.tag)
            };
            let mut combined = VariantDef::new(tag, l.fields.clone());
            for f in &r.fields {
                push_field(&mut combined, f)?;
            }
            out.push(combined);
        }
    }
    Ok(out)
}

fn push_field(v: &mut VariantDef, f: &FieldDef) -> Result<(), FlattenError> {
    if v.field(&f.name).is_some() {
        return Err(FlattenError::FieldCollision {
            tag: v.tag.clone(),
            field: f.name.clone(),
        });
    }
    v.fields.push(FieldDef::new(f.name.clone(), f.ty.clone()));
    Ok(())
}

fn too_many(count: usize) -> FlattenError {
    FlattenError::TooManyCombinations {
        count,
        max: MAX_FLATTENED_COMBINATIONS,
    }
}

/// Render a union as a source declaration.
pub fn render(def: &UnionDef) -> String {
    let mut out = format!("union {} {{\n", def.name);
    for v in &def.variants {
        let _ = write!(out, "    {}", v.tag);
        if !v.fields.is_empty() {
            let fields: Vec<String> = v
                .fields
                .iter()
                .map(|f| format!("{}: {}", f.name, f.ty))
                .collect();
            let _ = write!(out, " {{ {} }}", fields.join(", "));
        }
        out.push_str(",\n");
    }
    out.push('}');
    out
}
