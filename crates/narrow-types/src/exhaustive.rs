//! Exhaustiveness and redundancy checking for multi-field case analysis.
//!
//! Implements Maranget's algorithm from "Warnings for Pattern Matching" (JFP 2007),
//! specialised to flat tuple patterns: every column is a discriminant, a
//! boolean, or an open scalar, and no constructor carries sub-patterns.
//!
//! Key concepts:
//! - A pattern matrix holds one row per `case`, one column per scrutinee
//! - Exhaustiveness: search for a combination no row matches (the witness)
//! - Redundancy: a row is redundant if it is not useful against the rows above
//!
//! A union column's constructors are the variants still in its residual, so a
//! scrutinee that was already narrowed only needs its remaining variants
//! covered.

use crate::ty::{Ty, TyConst};
use narrow_ast::span::Span;
use std::collections::HashSet;

/// Maximum size of pattern matrix (rows × columns) to prevent DoS
pub const MAX_PATTERN_MATRIX_SIZE: usize = 10_000;

/// Maximum recursion depth for exhaustiveness checking
pub const MAX_EXHAUSTIVENESS_DEPTH: usize = 100;

/// Errors that can occur during exhaustiveness checking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustivenessError {
    /// Pattern matrix too large (DoS protection)
    MatrixTooLarge { size: usize, span: Span },
    /// Recursion depth exceeded (DoS protection)
    DepthExceeded { span: Span },
}

/// A witness is an example of an uncovered combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    pub patterns: Vec<WitnessPat>,
}

impl Witness {
    pub fn from_patterns(patterns: Vec<WitnessPat>) -> Self {
        Witness { patterns }
    }
}

impl std::fmt::Display for Witness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.patterns.is_empty() {
            write!(f, "_")
        } else if self.patterns.len() == 1 {
            write!(f, "{}", self.patterns[0])
        } else {
            write!(f, "(")?;
            for (i, pat) in self.patterns.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", pat)?;
            }
            write!(f, ")")
        }
    }
}

/// A pattern in a witness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessPat {
    Wildcard,
    /// A qualified variant (`Channel::sms`) or `true`/`false`
    Constructor(String),
}

impl std::fmt::Display for WitnessPat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WitnessPat::Wildcard => write!(f, "_"),
            WitnessPat::Constructor(name) => write!(f, "{}", name),
        }
    }
}

/// Normalized pattern element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimplifiedPat {
    /// Wildcard pattern (matches anything)
    Wildcard,
    /// Fully qualified variant name (e.g., "Channel::email")
    Constructor(String),
    /// Literal pattern (Int, Bool, String)
    Literal(LiteralPat),
}

/// Literal patterns
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiteralPat {
    Int(i64),
    Bool(bool),
    String(String),
}

impl std::fmt::Display for LiteralPat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiteralPat::Int(n) => write!(f, "{}", n),
            LiteralPat::Bool(b) => write!(f, "{}", b),
            LiteralPat::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl SimplifiedPat {
    /// The constructor name this pattern covers, if any.
    fn ctor_name(&self) -> Option<String> {
        match self {
            SimplifiedPat::Wildcard => None,
            SimplifiedPat::Constructor(name) => Some(name.clone()),
            SimplifiedPat::Literal(lit) => Some(lit.to_string()),
        }
    }
}

/// A row in the pattern matrix
#[derive(Debug, Clone)]
pub struct PatternRow {
    /// Patterns in this row (one per column)
    pub patterns: Vec<SimplifiedPat>,
    /// Index of the original case (for redundancy reporting)
    pub arm_index: usize,
}

impl PatternRow {
    pub fn new(patterns: Vec<SimplifiedPat>, arm_index: usize) -> Self {
        PatternRow {
            patterns,
            arm_index,
        }
    }

    pub fn first(&self) -> Option<&SimplifiedPat> {
        self.patterns.first()
    }

    pub fn rest(&self) -> &[SimplifiedPat] {
        if self.patterns.is_empty() {
            &[]
        } else {
            &self.patterns[1..]
        }
    }
}

/// A pattern matrix for exhaustiveness checking
#[derive(Debug, Clone)]
pub struct PatternMatrix {
    pub rows: Vec<PatternRow>,
    /// Types of each column
    pub column_types: Vec<Ty>,
}

impl PatternMatrix {
    pub fn new(column_types: Vec<Ty>) -> Self {
        PatternMatrix {
            rows: vec![],
            column_types,
        }
    }

    pub fn with_rows(rows: Vec<PatternRow>, column_types: Vec<Ty>) -> Self {
        PatternMatrix { rows, column_types }
    }

    pub fn add_row(&mut self, row: PatternRow) {
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get the size (rows × columns) for DoS protection
    pub fn size(&self) -> usize {
        self.rows.len() * self.column_types.len().max(1)
    }

    fn rest_types(&self) -> Vec<Ty> {
        self.column_types.iter().skip(1).cloned().collect()
    }
}

/// The constructors a column type can take.
///
/// `finite == false` marks open types (Int, String, ...) whose values can
/// only be covered by a wildcard. An empty finite signature is `Never`.
#[derive(Debug, Clone)]
struct Signature {
    ctors: Vec<String>,
    finite: bool,
}

impl Signature {
    fn for_type(ty: &Ty) -> Self {
        match ty {
            Ty::Union(u) => Signature {
                ctors: u.qualified(),
                finite: true,
            },
            Ty::Const(TyConst::Bool) => Signature {
                ctors: vec!["true".into(), "false".into()],
                finite: true,
            },
            Ty::Never => Signature {
                ctors: vec![],
                finite: true,
            },
            _ => Signature {
                ctors: vec![],
                finite: false,
            },
        }
    }

    fn is_complete(&self, used: &HashSet<String>) -> bool {
        self.finite && self.ctors.iter().all(|c| used.contains(c))
    }

    fn missing(&self, used: &HashSet<String>) -> Option<&String> {
        self.ctors.iter().find(|c| !used.contains(*c))
    }
}

pub struct ExhaustivenessChecker {
    depth: usize,
    /// Span for error reporting
    span: Span,
}

impl ExhaustivenessChecker {
    pub fn new(span: Span) -> Self {
        ExhaustivenessChecker { depth: 0, span }
    }

    fn guard(&self, matrix: &PatternMatrix) -> Result<(), ExhaustivenessError> {
        if matrix.size() > MAX_PATTERN_MATRIX_SIZE {
            return Err(ExhaustivenessError::MatrixTooLarge {
                size: matrix.size(),
                span: self.span,
            });
        }
        if self.depth > MAX_EXHAUSTIVENESS_DEPTH {
            return Err(ExhaustivenessError::DepthExceeded { span: self.span });
        }
        Ok(())
    }

    /// Check if a pattern matrix is exhaustive.
    /// Returns None if exhaustive, Some(witness) if not.
    pub fn check_exhaustive(
        &mut self,
        matrix: &PatternMatrix,
    ) -> Result<Option<Witness>, ExhaustivenessError> {
        self.guard(matrix)?;
        self.depth += 1;
        let result = self.check_exhaustive_inner(matrix);
        self.depth -= 1;
        result
    }

    fn check_exhaustive_inner(
        &mut self,
        matrix: &PatternMatrix,
    ) -> Result<Option<Witness>, ExhaustivenessError> {
        // No columns: exhaustive iff some row survived specialization
        let Some(first_type) = matrix.column_types.first() else {
            return Ok(if matrix.is_empty() {
                Some(Witness::from_patterns(vec![]))
            } else {
                None
            });
        };

        // Empty matrix: any value is a witness, unless some column is
        // uninhabited and there is no value at all
        if matrix.is_empty() && !matrix.column_types.iter().any(Ty::is_never) {
            return Ok(Some(Witness::from_patterns(
                matrix
                    .column_types
                    .iter()
                    .map(|_| WitnessPat::Wildcard)
                    .collect(),
            )));
        }

        let sig = Signature::for_type(first_type);
        let used = used_constructors(matrix);

        if sig.is_complete(&used) {
            for ctor in &sig.ctors {
                let specialized = specialize_matrix(matrix, ctor);
                if let Some(mut witness) = self.check_exhaustive(&specialized)? {
                    witness
                        .patterns
                        .insert(0, WitnessPat::Constructor(ctor.clone()));
                    return Ok(Some(witness));
                }
            }
            return Ok(None);
        }

        let default = default_matrix(matrix);
        match self.check_exhaustive(&default)? {
            Some(mut witness) => {
                let head = match sig.missing(&used) {
                    Some(ctor) => WitnessPat::Constructor(ctor.clone()),
                    None => WitnessPat::Wildcard,
                };
                witness.patterns.insert(0, head);
                Ok(Some(witness))
            }
            None => Ok(None),
        }
    }

    /// Check which rows are redundant (unreachable).
    /// Returns arm indices of redundant rows.
    pub fn check_redundant(
        &mut self,
        matrix: &PatternMatrix,
    ) -> Result<Vec<usize>, ExhaustivenessError> {
        let mut redundant = vec![];
        for i in 0..matrix.rows.len() {
            let preceding =
                PatternMatrix::with_rows(matrix.rows[..i].to_vec(), matrix.column_types.clone());
            if !self.is_useful(&preceding, &matrix.rows[i].patterns)? {
                redundant.push(matrix.rows[i].arm_index);
            }
        }
        Ok(redundant)
    }

    /// Whether `row` would match some value none of `matrix`'s rows match.
    fn is_useful(
        &mut self,
        matrix: &PatternMatrix,
        row: &[SimplifiedPat],
    ) -> Result<bool, ExhaustivenessError> {
        self.guard(matrix)?;
        self.depth += 1;
        let result = self.is_useful_inner(matrix, row);
        self.depth -= 1;
        result
    }

    fn is_useful_inner(
        &mut self,
        matrix: &PatternMatrix,
        row: &[SimplifiedPat],
    ) -> Result<bool, ExhaustivenessError> {
        let (Some(first_pat), Some(first_type)) = (row.first(), matrix.column_types.first())
        else {
            return Ok(matrix.is_empty());
        };

        match first_pat.ctor_name() {
            Some(ctor) => {
                let specialized = specialize_matrix(matrix, &ctor);
                self.is_useful(&specialized, &row[1..])
            }
            None => {
                let sig = Signature::for_type(first_type);
                let used = used_constructors(matrix);
                if sig.is_complete(&used) {
                    for ctor in &sig.ctors {
                        let specialized = specialize_matrix(matrix, ctor);
                        if self.is_useful(&specialized, &row[1..])? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                } else {
                    let default = default_matrix(matrix);
                    self.is_useful(&default, &row[1..])
                }
            }
        }
    }
}

/// Constructors used in the first column of the matrix
fn used_constructors(matrix: &PatternMatrix) -> HashSet<String> {
    matrix
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(SimplifiedPat::ctor_name))
        .collect()
}

/// Keep rows whose first pattern admits `ctor`, dropping the first column.
fn specialize_matrix(matrix: &PatternMatrix, ctor: &str) -> PatternMatrix {
    let rows = matrix
        .rows
        .iter()
        .filter(|row| match row.first().and_then(SimplifiedPat::ctor_name) {
            Some(name) => name == ctor,
            None => true,
        })
        .map(|row| PatternRow::new(row.rest().to_vec(), row.arm_index))
        .collect();
    PatternMatrix::with_rows(rows, matrix.rest_types())
}

/// Rows that start with a wildcard, first column removed.
fn default_matrix(matrix: &PatternMatrix) -> PatternMatrix {
    let rows = matrix
        .rows
        .iter()
        .filter(|row| matches!(row.first(), Some(SimplifiedPat::Wildcard)))
        .map(|row| PatternRow::new(row.rest().to_vec(), row.arm_index))
        .collect();
    PatternMatrix::with_rows(rows, matrix.rest_types())
}

/// Check exhaustiveness and redundancy for a tuple switch.
///
/// `rows` are the case patterns in order; a `default` is passed as
/// `has_default` and acts as a trailing all-wildcard row that is never
/// itself reported redundant.
/// Returns (non_exhaustive_witness, redundant_case_indices).
pub fn check_match(
    rows: Vec<Vec<SimplifiedPat>>,
    column_types: &[Ty],
    has_default: bool,
    span: Span,
) -> Result<(Option<Witness>, Vec<usize>), ExhaustivenessError> {
    let mut matrix = PatternMatrix::new(column_types.to_vec());
    let cases = rows.len();
    for (i, patterns) in rows.into_iter().enumerate() {
        matrix.add_row(PatternRow::new(patterns, i));
    }

    let mut checker = ExhaustivenessChecker::new(span);
    checker.guard(&matrix)?;
    let redundant = checker.check_redundant(&matrix)?;

    if has_default {
        matrix.add_row(PatternRow::new(
            vec![SimplifiedPat::Wildcard; column_types.len()],
            cases,
        ));
    }
    let witness = checker.check_exhaustive(&matrix)?;

    Ok((witness, redundant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn span() -> Span {
        Span { start: 0, end: 0 }
    }

    fn union(name: &str, tags: &[&str]) -> Ty {
        Ty::union_of(
            name,
            tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            tags.len(),
        )
    }

    fn ctor(name: &str) -> SimplifiedPat {
        SimplifiedPat::Constructor(name.to_string())
    }

    use SimplifiedPat::Wildcard;

    #[test]
    fn test_empty_matrix_not_exhaustive() {
        let mut checker = ExhaustivenessChecker::new(span());
        let matrix = PatternMatrix::new(vec![Ty::int()]);
        let result = checker.check_exhaustive(&matrix).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn test_wildcard_exhaustive() {
        let mut checker = ExhaustivenessChecker::new(span());
        let mut matrix = PatternMatrix::new(vec![Ty::int()]);
        matrix.add_row(PatternRow::new(vec![Wildcard], 0));
        assert!(checker.check_exhaustive(&matrix).unwrap().is_none());
    }

    #[test]
    fn test_bool_not_exhaustive() {
        let mut checker = ExhaustivenessChecker::new(span());
        let mut matrix = PatternMatrix::new(vec![Ty::bool_()]);
        matrix.add_row(PatternRow::new(
            vec![SimplifiedPat::Literal(LiteralPat::Bool(true))],
            0,
        ));
        let witness = checker.check_exhaustive(&matrix).unwrap().unwrap();
        assert_eq!(format!("{}", witness), "false");
    }

    #[test]
    fn test_int_literals_need_wildcard() {
        let columns = [Ty::int()];
        let rows = vec![
            vec![SimplifiedPat::Literal(LiteralPat::Int(1))],
            vec![SimplifiedPat::Literal(LiteralPat::Int(2))],
        ];
        let (witness, redundant) = check_match(rows, &columns, false, span()).unwrap();
        assert_eq!(witness.unwrap().to_string(), "_");
        assert!(redundant.is_empty());
    }

    #[test]
    fn test_cross_product_witness() {
        let channel = union("Channel", &["email", "sms"]);
        let format = union("Format", &["html", "plain"]);
        let rows = vec![
            vec![ctor("Channel::email"), ctor("Format::html")],
            vec![ctor("Channel::email"), ctor("Format::plain")],
        ];
        let (witness, _) = check_match(rows, &[channel, format], false, span()).unwrap();
        assert_eq!(witness.unwrap().to_string(), "(Channel::sms, _)");
    }

    #[test]
    fn test_cross_product_exhaustive_with_wildcard() {
        let channel = union("Channel", &["email", "sms"]);
        let format = union("Format", &["html", "plain"]);
        let rows = vec![
            vec![ctor("Channel::email"), ctor("Format::html")],
            vec![ctor("Channel::email"), ctor("Format::plain")],
            vec![ctor("Channel::sms"), Wildcard],
        ];
        let (witness, redundant) =
            check_match(rows, &[channel, format], false, span()).unwrap();
        assert!(witness.is_none());
        assert!(redundant.is_empty());
    }

    #[test]
    fn test_redundant_after_wildcard() {
        let channel = union("Channel", &["email", "sms"]);
        let format = union("Format", &["html", "plain"]);
        let rows = vec![
            vec![ctor("Channel::email"), Wildcard],
            vec![ctor("Channel::email"), ctor("Format::html")],
            vec![ctor("Channel::sms"), Wildcard],
        ];
        let (_, redundant) = check_match(rows, &[channel, format], false, span()).unwrap();
        assert_eq!(redundant, vec![1]);
    }

    #[test]
    fn test_default_closes_gap_but_is_not_redundant() {
        let channel = union("Channel", &["email", "sms"]);
        let rows = vec![vec![ctor("Channel::email")], vec![ctor("Channel::sms")]];
        let (witness, redundant) = check_match(rows, &[channel], true, span()).unwrap();
        assert!(witness.is_none());
        assert!(redundant.is_empty());
    }

    #[test]
    fn test_narrowed_column_only_needs_residual() {
        // Channel narrowed to {sms}: a single row covers it
        let narrowed = Ty::variant("Channel", "sms", 2);
        let rows = vec![vec![ctor("Channel::sms")]];
        let (witness, _) = check_match(rows, &[narrowed], false, span()).unwrap();
        assert!(witness.is_none());
    }

    #[test]
    fn test_never_column_is_vacuously_covered() {
        let (witness, _) = check_match(vec![], &[Ty::Never], false, span()).unwrap();
        assert!(witness.is_none());
    }

    #[test]
    fn test_matrix_too_large() {
        let rows = (0..MAX_PATTERN_MATRIX_SIZE + 1)
            .map(|_| vec![Wildcard])
            .collect();
        let err = check_match(rows, &[Ty::int()], false, span()).unwrap_err();
        assert!(matches!(err, ExhaustivenessError::MatrixTooLarge { .. }));
    }

    #[test]
    fn test_depth_exceeded() {
        let columns = vec![Ty::int(); MAX_EXHAUSTIVENESS_DEPTH + 5];
        let rows = vec![vec![Wildcard; columns.len()]];
        let err = check_match(rows, &columns, false, span()).unwrap_err();
        assert_eq!(err, ExhaustivenessError::DepthExceeded { span: span() });
    }

    #[test]
    fn test_witness_display() {
        let witness = Witness::from_patterns(vec![
            WitnessPat::Constructor("Channel::sms".to_string()),
            WitnessPat::Wildcard,
        ]);
        assert_eq!(format!("{}", witness), "(Channel::sms, _)");
    }
}
