use std::collections::BTreeSet;
use std::fmt;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TyConst {
    Unit,
    Bool,
    Int,
    String,
}

/// A (possibly narrowed) view of a closed union.
///
/// `variants` is the residual: the tags a value of this type may still carry.
/// It is never empty; an exhausted residual is represented by [`Ty::Never`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct UnionTy {
    pub name: String,
    pub variants: BTreeSet<String>,
    /// Number of variants the union declares.
    pub total: usize,
}

impl UnionTy {
    pub fn is_full(&self) -> bool {
        self.variants.len() == self.total
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.variants.contains(tag)
    }

    /// Qualified names of the remaining variants, e.g. `["Calc::divide"]`.
    pub fn qualified(&self) -> Vec<String> {
        self.variants
            .iter()
            .map(|tag| format!("{}::{}", self.name, tag))
            .collect()
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Ty {
    Const(TyConst),
    Union(UnionTy),
    Arrow(Vec<Ty>, Box<Ty>),
    /// The uninhabited type: an empty residual, or an expression that never
    /// produces a value. Assignable to every type.
    Never,
}

impl Ty {
    #[inline]
    pub fn unit() -> Self {
        Ty::Const(TyConst::Unit)
    }
    #[inline]
    pub fn bool_() -> Self {
        Ty::Const(TyConst::Bool)
    }
    #[inline]
    pub fn int() -> Self {
        Ty::Const(TyConst::Int)
    }
    #[inline]
    pub fn string() -> Self {
        Ty::Const(TyConst::String)
    }
    #[inline]
    pub fn arrow(params: Vec<Ty>, ret: Ty) -> Self {
        Ty::Arrow(params, Box::new(ret))
    }
    /// A zero-argument callable: the shape of a deferred effect.
    pub fn thunk(ret: Ty) -> Self {
        Ty::Arrow(vec![], Box::new(ret))
    }

    /// A union narrowed to `variants`; collapses to `Never` when none remain.
    pub fn union_of(name: impl Into<String>, variants: BTreeSet<String>, total: usize) -> Self {
        if variants.is_empty() {
            return Ty::Never;
        }
        Ty::Union(UnionTy {
            name: name.into(),
            variants,
            total,
        })
    }

    /// A union narrowed to exactly one variant.
    pub fn variant(name: impl Into<String>, tag: impl Into<String>, total: usize) -> Self {
        Ty::union_of(name, BTreeSet::from([tag.into()]), total)
    }

    pub fn as_union(&self) -> Option<&UnionTy> {
        match self {
            Ty::Union(u) => Some(u),
            _ => None,
        }
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Ty::Never)
    }

    pub fn is_fn(&self) -> bool {
        matches!(self, Ty::Arrow(..))
    }
}

/// Whether a value of type `from` may flow into a slot of type `to`.
///
/// `Never` flows anywhere; a narrowed union flows into any wider view of the
/// same union; function types are contravariant in parameters and covariant
/// in the result.
pub fn is_assignable(from: &Ty, to: &Ty) -> bool {
    match (from, to) {
        (Ty::Never, _) => true,
        (Ty::Union(a), Ty::Union(b)) => a.name == b.name && a.variants.is_subset(&b.variants),
        (Ty::Arrow(fp, fr), Ty::Arrow(tp, tr)) => {
            fp.len() == tp.len()
                && tp.iter().zip(fp).all(|(t, f)| is_assignable(t, f))
                && is_assignable(fr, tr)
        }
        _ => from == to,
    }
}

impl fmt::Display for UnionTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full() {
            return write!(f, "{}", self.name);
        }
        for (i, tag) in self.variants.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}::{}", self.name, tag)?;
        }
        Ok(())
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Const(TyConst::Unit) => write!(f, "Unit"),
            Ty::Const(TyConst::Bool) => write!(f, "Bool"),
            Ty::Const(TyConst::Int) => write!(f, "Int"),
            Ty::Const(TyConst::String) => write!(f, "String"),
            Ty::Union(u) => write!(f, "{}", u),
            Ty::Arrow(params, ret) => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", ret)
            }
            Ty::Never => write!(f, "Never"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc(tags: &[&str]) -> Ty {
        Ty::union_of(
            "Calc",
            tags.iter().map(|t| t.to_string()).collect(),
            3,
        )
    }

    #[test]
    fn empty_residual_is_never() {
        assert_eq!(calc(&[]), Ty::Never);
    }

    #[test]
    fn display_full_and_narrowed() {
        assert_eq!(calc(&["add", "divide", "multiply"]).to_string(), "Calc");
        assert_eq!(
            calc(&["divide", "add"]).to_string(),
            "Calc::add | Calc::divide"
        );
        assert_eq!(Ty::thunk(Ty::unit()).to_string(), "fn() -> Unit");
    }

    #[test]
    fn narrowed_union_flows_into_wider() {
        let narrow = calc(&["add"]);
        let wide = calc(&["add", "divide", "multiply"]);
        assert!(is_assignable(&narrow, &wide));
        assert!(!is_assignable(&wide, &narrow));
    }

    #[test]
    fn only_never_flows_into_never() {
        assert!(is_assignable(&Ty::Never, &Ty::Never));
        assert!(!is_assignable(&calc(&["add"]), &Ty::Never));
        assert!(!is_assignable(&Ty::unit(), &Ty::Never));
        assert!(is_assignable(&Ty::Never, &Ty::int()));
    }

    #[test]
    fn arrow_variance() {
        let narrow = calc(&["add"]);
        let wide = calc(&["add", "divide", "multiply"]);
        // fn(Calc) -> Calc::add  <:  fn(Calc::add) -> Calc
        let f = Ty::arrow(vec![wide.clone()], narrow.clone());
        let g = Ty::arrow(vec![narrow], wide);
        assert!(is_assignable(&f, &g));
        assert!(!is_assignable(&g, &f));
    }

    #[test]
    fn unit_thunk_differs_from_unit() {
        assert!(!is_assignable(&Ty::unit(), &Ty::thunk(Ty::unit())));
    }
}
