//! Query planning: decides whether a statement can be scattered across
//! workers and rewrites it into per-part sub-queries.
//!
//! A statement qualifies for splitting when it is a single plain SELECT
//! over one table whose WHERE clause contains a top-level
//! `column BETWEEN <int> AND <int>` conjunct. The range is tiled into
//! contiguous sub-ranges, every other conjunct is kept in each part, and
//! the merge strategy records how partial results recombine. Anything the
//! planner cannot prove safe to split is passed through to one worker
//! untouched, so splitting is never allowed to change results.

use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident,
    SelectItem, SetExpr, Statement, TableFactor, UnaryOperator, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

/// Alias prefix for the sum half of a decomposed AVG.
const PART_SUM_PREFIX: &str = "__part_sum_";
/// Alias prefix for the count half of a decomposed AVG.
const PART_COUNT_PREFIX: &str = "__part_cnt_";

/// A fully planned statement: the sub-queries to scatter and the recipe
/// for recombining their results.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// SQL text per part; one entry means no split happened.
    pub subqueries: Vec<String>,
    pub merge: MergeStrategy,
}

/// How merged results are assembled from per-part responses.
#[derive(Debug, Clone)]
pub enum MergeStrategy {
    /// Single sub-query, relayed untouched.
    PassThrough,
    /// Plain row select: concatenate part rows in part order.
    Concat,
    /// Aggregate query: fold part rows per group key.
    Aggregate(AggregatePlan),
}

impl MergeStrategy {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            MergeStrategy::PassThrough => "pass-through",
            MergeStrategy::Concat => "concat",
            MergeStrategy::Aggregate(_) => "aggregate",
        }
    }
}

/// Merge recipe for an aggregate query.
#[derive(Debug, Clone)]
pub struct AggregatePlan {
    /// Output columns in projection order.
    pub columns: Vec<OutputColumn>,
    /// HAVING predicate, stripped from sub-queries and evaluated against
    /// merged rows.
    pub having: Option<Expr>,
}

/// One output column of an aggregate query.
#[derive(Debug, Clone)]
pub struct OutputColumn {
    /// Column name in worker responses and in the merged result.
    pub name: String,
    /// Canonical text of the source expression.
    pub expr_text: String,
    pub kind: ColumnKind,
}

/// How one output column folds across parts.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    /// Grouping key; equal values identify the same group.
    Key,
    /// COUNT partial: integer sum.
    Count,
    /// SUM partial: numeric sum, promoted to float on mixed types.
    Sum,
    Min,
    Max,
    /// AVG, decomposed into per-part SUM and COUNT under internal aliases.
    Avg {
        /// Argument expression text, reused in the decomposed calls.
        arg: String,
        sum_name: String,
        count_name: String,
    },
}

/// Plans `sql` into at most `max_parts` sub-queries.
///
/// Never fails: statements the planner does not understand, or that are
/// unsafe to split, come back as a single pass-through part carrying the
/// original text byte for byte.
pub fn plan(sql: &str, max_parts: usize) -> QueryPlan {
    try_split(sql, max_parts).unwrap_or_else(|| QueryPlan {
        subqueries: vec![sql.to_string()],
        merge: MergeStrategy::PassThrough,
    })
}

fn try_split(sql: &str, max_parts: usize) -> Option<QueryPlan> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    let [statement] = statements.as_slice() else {
        return None;
    };

    let query = match statement {
        Statement::Query(q) => q,
        _ => return None,
    };
    if query.with.is_some()
        || query.order_by.is_some()
        || query.limit.is_some()
        || !query.limit_by.is_empty()
        || query.offset.is_some()
        || query.fetch.is_some()
        || !query.locks.is_empty()
    {
        return None;
    }

    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return None,
    };
    if select.distinct.is_some()
        || select.top.is_some()
        || select.into.is_some()
        || !select.lateral_views.is_empty()
        || !select.named_window.is_empty()
        || select.qualify.is_some()
    {
        return None;
    }
    let [table] = select.from.as_slice() else {
        return None;
    };
    if !table.joins.is_empty() || !matches!(table.relation, TableFactor::Table { .. }) {
        return None;
    }

    let where_expr = select.selection.as_ref()?;
    let (range_index, low, high) = find_range_conjunct(where_expr)?;
    if high < low {
        return None;
    }
    let span = high.checked_sub(low)?.checked_add(1)?;
    let parts = (max_parts.max(1) as i64).min(span);
    if parts < 2 {
        return None;
    }

    let group_by = match &select.group_by {
        GroupByExpr::Expressions(exprs, modifiers) if modifiers.is_empty() => exprs.as_slice(),
        _ => return None,
    };

    let folds = !group_by.is_empty()
        || select
            .projection
            .iter()
            .any(item_mentions_function);

    let aggregate = if folds {
        let columns = classify_projection(&select.projection, group_by)?;
        let having = match &select.having {
            Some(h) => Some(resolve_having(h, &columns)?),
            None => None,
        };
        Some(AggregatePlan { columns, having })
    } else {
        if select.having.is_some() {
            return None;
        }
        None
    };

    let step = span / parts;
    let mut subqueries = Vec::with_capacity(parts as usize);
    for i in 0..parts {
        let start = low + i * step;
        let end = if i == parts - 1 {
            high
        } else {
            low + (i + 1) * step - 1
        };
        subqueries.push(rewrite_part(
            statement,
            range_index,
            start,
            end,
            aggregate.as_ref(),
        )?);
    }

    Some(QueryPlan {
        merge: match aggregate {
            Some(plan) => MergeStrategy::Aggregate(plan),
            None => MergeStrategy::Concat,
        },
        subqueries,
    })
}

/// Splits a WHERE expression into its top-level AND conjuncts.
fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut conjuncts = split_conjuncts(left);
            conjuncts.extend(split_conjuncts(right));
            conjuncts
        }
        Expr::Nested(inner) => split_conjuncts(inner),
        other => vec![other],
    }
}

/// Finds the first `<column> BETWEEN <int> AND <int>` conjunct whose
/// subject is a plain column reference; the column is assumed to be
/// integer-typed, so contiguous integer tiles cover the range exactly.
///
/// Returns its position among the conjuncts plus the literal bounds.
fn find_range_conjunct(where_expr: &Expr) -> Option<(usize, i64, i64)> {
    split_conjuncts(where_expr)
        .iter()
        .enumerate()
        .find_map(|(index, conjunct)| match conjunct {
            Expr::Between {
                expr: subject,
                negated: false,
                low,
                high,
            } => {
                if !matches!(
                    subject.as_ref(),
                    Expr::Identifier(_) | Expr::CompoundIdentifier(_)
                ) {
                    return None;
                }
                Some((index, int_literal(low)?, int_literal(high)?))
            }
            _ => None,
        })
}

fn int_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Value(Value::Number(text, _)) => text.parse().ok(),
        _ => None,
    }
}

/// True when the item's expression may invoke a function.
///
/// Any function call could be an aggregate (PostgreSQL allows user-defined
/// ones), so the concat strategy refuses projections containing them and
/// unknown expression shapes are treated as if they did.
fn item_mentions_function(item: &SelectItem) -> bool {
    match item {
        SelectItem::UnnamedExpr(expr) => expr_mentions_function(expr),
        SelectItem::ExprWithAlias { expr, .. } => expr_mentions_function(expr),
        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => false,
    }
}

fn expr_mentions_function(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) | Expr::Value(_) => false,
        Expr::Nested(inner) => expr_mentions_function(inner),
        Expr::UnaryOp { expr: inner, .. } => expr_mentions_function(inner),
        Expr::Cast { expr: inner, .. } => expr_mentions_function(inner),
        Expr::IsNull(inner) | Expr::IsNotNull(inner) => expr_mentions_function(inner),
        Expr::BinaryOp { left, right, .. } => {
            expr_mentions_function(left) || expr_mentions_function(right)
        }
        Expr::Between {
            expr: subject,
            low,
            high,
            ..
        } => {
            expr_mentions_function(subject)
                || expr_mentions_function(low)
                || expr_mentions_function(high)
        }
        Expr::InList { expr: subject, list, .. } => {
            expr_mentions_function(subject) || list.iter().any(expr_mentions_function)
        }
        Expr::Function(_) => true,
        _ => true,
    }
}

/// The five aggregate calls the merger knows how to fold.
enum AggCall {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

enum Classified {
    Agg(AggCall, String),
    Plain,
}

/// Classifies a projection expression as a supported top-level aggregate
/// call or a plain (key candidate) expression. `None` means the statement
/// cannot be split at all.
fn classify_expr(expr: &Expr) -> Option<Classified> {
    if let Expr::Function(function) = expr {
        let name = function.name.to_string().to_ascii_uppercase();
        let call = match name.as_str() {
            "COUNT" => Some(AggCall::Count),
            "SUM" => Some(AggCall::Sum),
            "MIN" => Some(AggCall::Min),
            "MAX" => Some(AggCall::Max),
            "AVG" => Some(AggCall::Avg),
            _ => None,
        };
        let Some(call) = call else {
            // An unknown call may itself be an aggregate the merger
            // cannot fold.
            return None;
        };

        if function.over.is_some()
            || function.filter.is_some()
            || function.null_treatment.is_some()
            || !function.within_group.is_empty()
            || !matches!(function.parameters, FunctionArguments::None)
        {
            return None;
        }
        let FunctionArguments::List(list) = &function.args else {
            return None;
        };
        if list.duplicate_treatment.is_some() || !list.clauses.is_empty() || list.args.len() != 1 {
            return None;
        }

        let arg = match &list.args[0] {
            FunctionArg::Unnamed(FunctionArgExpr::Wildcard) if matches!(call, AggCall::Count) => {
                "*".to_string()
            }
            FunctionArg::Unnamed(FunctionArgExpr::Expr(inner))
                if !expr_mentions_function(inner) =>
            {
                inner.to_string()
            }
            _ => return None,
        };
        return Some(Classified::Agg(call, arg));
    }

    if expr_mentions_function(expr) {
        return None;
    }
    Some(Classified::Plain)
}

/// The response key PostgreSQL will use for an identifier.
pub(crate) fn output_name(ident: &Ident) -> String {
    match ident.quote_style {
        None => ident.value.to_ascii_lowercase(),
        Some(_) => ident.value.clone(),
    }
}

/// The response key for an unaliased projection expression, when it can be
/// predicted.
fn implied_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(output_name(ident)),
        Expr::CompoundIdentifier(parts) => parts.last().map(output_name),
        Expr::Function(function) => {
            let full = function.name.to_string();
            let last = full.rsplit('.').next().unwrap_or(&full);
            Some(last.to_ascii_lowercase())
        }
        _ => None,
    }
}

fn group_entry_matches(entry: &Expr, expr_text: &str, name: &str) -> bool {
    if entry.to_string() == expr_text {
        return true;
    }
    match entry {
        Expr::Identifier(ident) => output_name(ident) == name,
        Expr::CompoundIdentifier(parts) => {
            parts.last().map(output_name).as_deref() == Some(name)
        }
        _ => false,
    }
}

/// Maps each projection item to an [`OutputColumn`].
///
/// Plain expressions must correspond to a GROUP BY entry (by text or by
/// output name), and every GROUP BY entry must surface in the projection;
/// otherwise group identity would be lost in worker responses and the
/// statement is not split.
fn classify_projection(
    projection: &[SelectItem],
    group_by: &[Expr],
) -> Option<Vec<OutputColumn>> {
    let mut columns = Vec::with_capacity(projection.len());

    for (index, item) in projection.iter().enumerate() {
        let (expr, name) = match item {
            SelectItem::UnnamedExpr(expr) => (expr, implied_name(expr)?),
            SelectItem::ExprWithAlias { expr, alias } => (expr, output_name(alias)),
            _ => return None,
        };
        let expr_text = expr.to_string();

        let kind = match classify_expr(expr)? {
            Classified::Agg(AggCall::Count, _) => ColumnKind::Count,
            Classified::Agg(AggCall::Sum, _) => ColumnKind::Sum,
            Classified::Agg(AggCall::Min, _) => ColumnKind::Min,
            Classified::Agg(AggCall::Max, _) => ColumnKind::Max,
            Classified::Agg(AggCall::Avg, arg) => ColumnKind::Avg {
                arg,
                sum_name: format!("{PART_SUM_PREFIX}{index}"),
                count_name: format!("{PART_COUNT_PREFIX}{index}"),
            },
            Classified::Plain => {
                if !group_by
                    .iter()
                    .any(|entry| group_entry_matches(entry, &expr_text, &name))
                {
                    return None;
                }
                ColumnKind::Key
            }
        };

        columns.push(OutputColumn {
            name,
            expr_text,
            kind,
        });
    }

    for entry in group_by {
        let surfaced = columns.iter().any(|column| {
            column.kind == ColumnKind::Key
                && group_entry_matches(entry, &column.expr_text, &column.name)
        });
        if !surfaced {
            return None;
        }
    }

    Some(columns)
}

/// Validates a HAVING predicate against the plan columns and rewrites
/// aggregate calls into references to their output columns.
///
/// Returns `None` when the predicate uses anything the merged rows cannot
/// answer, in which case the whole statement is passed through.
fn resolve_having(having: &Expr, columns: &[OutputColumn]) -> Option<Expr> {
    let mut resolved = having.clone();
    if resolve_predicate(&mut resolved, columns) {
        Some(resolved)
    } else {
        None
    }
}

fn resolve_predicate(expr: &mut Expr, columns: &[OutputColumn]) -> bool {
    match expr {
        Expr::Nested(inner) => resolve_predicate(inner, columns),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => resolve_predicate(inner, columns),
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And | BinaryOperator::Or => {
                resolve_predicate(left, columns) && resolve_predicate(right, columns)
            }
            BinaryOperator::Gt
            | BinaryOperator::GtEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Eq
            | BinaryOperator::NotEq => {
                resolve_operand(left, columns) && resolve_operand(right, columns)
            }
            _ => false,
        },
        _ => false,
    }
}

fn resolve_operand(expr: &mut Expr, columns: &[OutputColumn]) -> bool {
    match expr {
        Expr::Nested(inner) => resolve_operand(inner, columns),
        Expr::Identifier(ident) => {
            let name = output_name(ident);
            columns.iter().any(|column| column.name == name)
        }
        Expr::CompoundIdentifier(parts) => match parts.last() {
            Some(ident) => {
                let name = output_name(ident);
                columns.iter().any(|column| column.name == name)
            }
            None => false,
        },
        Expr::Value(
            Value::Number(..) | Value::SingleQuotedString(_) | Value::Boolean(_) | Value::Null,
        ) => true,
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => matches!(inner.as_ref(), Expr::Value(Value::Number(..))),
        Expr::Function(_) => {
            let text = expr.to_string();
            match columns.iter().find(|column| column.expr_text == text) {
                Some(column) => {
                    *expr = Expr::Identifier(Ident::with_quote('"', column.name.clone()));
                    true
                }
                None => false,
            }
        }
        _ => false,
    }
}

/// Clones the statement with the range conjunct narrowed to
/// `start..=end` and, for aggregate plans, the projection decomposed and
/// HAVING removed.
fn rewrite_part(
    statement: &Statement,
    range_index: usize,
    start: i64,
    end: i64,
    aggregate: Option<&AggregatePlan>,
) -> Option<String> {
    let mut part = statement.clone();
    let Statement::Query(query) = &mut part else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_mut() else {
        return None;
    };

    let selection = select.selection.as_mut()?;
    let mut seen = 0usize;
    set_range(selection, range_index, &mut seen, start, end);

    if let Some(plan) = aggregate {
        select.having = None;
        select.projection = rewrite_projection(&select.projection, &plan.columns)?;
    }

    Some(part.to_string())
}

/// Narrows the bounds of the conjunct at `target`, walking conjuncts in
/// the same order as [`split_conjuncts`].
fn set_range(expr: &mut Expr, target: usize, seen: &mut usize, start: i64, end: i64) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            set_range(left, target, seen, start, end);
            set_range(right, target, seen, start, end);
        }
        Expr::Nested(inner) => set_range(inner, target, seen, start, end),
        leaf => {
            if *seen == target {
                if let Expr::Between { low, high, .. } = leaf {
                    **low = int_expr(start);
                    **high = int_expr(end);
                }
            }
            *seen += 1;
        }
    }
}

fn int_expr(value: i64) -> Expr {
    Expr::Value(Value::Number(value.to_string(), false))
}

/// Replaces AVG projection items with their SUM and COUNT decomposition;
/// all other items are kept verbatim.
fn rewrite_projection(
    items: &[SelectItem],
    columns: &[OutputColumn],
) -> Option<Vec<SelectItem>> {
    let mut rewritten = Vec::with_capacity(items.len());
    for (item, column) in items.iter().zip(columns) {
        match &column.kind {
            ColumnKind::Avg {
                arg,
                sum_name,
                count_name,
            } => {
                rewritten.push(parse_select_item(&format!("SUM({arg}) AS {sum_name}"))?);
                rewritten.push(parse_select_item(&format!(
                    "COUNT({arg}) AS {count_name}"
                ))?);
            }
            _ => rewritten.push(item.clone()),
        }
    }
    Some(rewritten)
}

/// Parses a single projection item by wrapping it in a throwaway SELECT.
/// Keeps the rewrite on the parser's own node construction.
fn parse_select_item(text: &str) -> Option<SelectItem> {
    let sql = format!("SELECT {text}");
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql).ok()?;
    match statements.pop()? {
        Statement::Query(query) => match *query.body {
            SetExpr::Select(select) => select.projection.into_iter().next(),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregate_plan(plan: &QueryPlan) -> &AggregatePlan {
        match &plan.merge {
            MergeStrategy::Aggregate(aggregate) => aggregate,
            other => panic!("expected aggregate strategy, got {}", other.label()),
        }
    }

    #[test]
    fn between_splits_into_contiguous_ranges() {
        let plan = plan("SELECT * FROM numbers WHERE id BETWEEN 1 AND 100", 4);

        assert!(matches!(plan.merge, MergeStrategy::Concat));
        assert_eq!(plan.subqueries.len(), 4);
        assert!(plan.subqueries[0].contains("id BETWEEN 1 AND 25"));
        assert!(plan.subqueries[1].contains("id BETWEEN 26 AND 50"));
        assert!(plan.subqueries[2].contains("id BETWEEN 51 AND 75"));
        assert!(plan.subqueries[3].contains("id BETWEEN 76 AND 100"));
    }

    #[test]
    fn remainder_lands_in_the_last_part() {
        let plan = plan("SELECT * FROM numbers WHERE id BETWEEN 1 AND 10", 3);

        assert_eq!(plan.subqueries.len(), 3);
        assert!(plan.subqueries[0].contains("id BETWEEN 1 AND 3"));
        assert!(plan.subqueries[1].contains("id BETWEEN 4 AND 6"));
        assert!(plan.subqueries[2].contains("id BETWEEN 7 AND 10"));
    }

    #[test]
    fn sibling_conjuncts_survive_in_every_part() {
        let plan = plan(
            "SELECT * FROM events WHERE active = true AND id BETWEEN 1 AND 8",
            2,
        );

        assert_eq!(plan.subqueries.len(), 2);
        for subquery in &plan.subqueries {
            assert!(subquery.contains("active = true"));
        }
        assert!(plan.subqueries[0].contains("id BETWEEN 1 AND 4"));
        assert!(plan.subqueries[1].contains("id BETWEEN 5 AND 8"));
    }

    #[test]
    fn qualified_range_column_still_splits() {
        let plan = plan("SELECT * FROM numbers WHERE numbers.id BETWEEN 1 AND 8", 2);

        assert_eq!(plan.subqueries.len(), 2);
        assert!(plan.subqueries[0].contains("numbers.id BETWEEN 1 AND 4"));
        assert!(plan.subqueries[1].contains("numbers.id BETWEEN 5 AND 8"));
    }

    #[test]
    fn subquery_in_a_sibling_conjunct_still_splits() {
        let plan = plan(
            "SELECT n FROM t WHERE id BETWEEN 1 AND 10 AND x IN (SELECT y FROM u)",
            2,
        );

        assert_eq!(plan.subqueries.len(), 2);
        assert!(plan.subqueries[0].contains("id BETWEEN 1 AND 5"));
        assert!(plan.subqueries[1].contains("id BETWEEN 6 AND 10"));
        for subquery in &plan.subqueries {
            assert!(subquery.contains("x IN (SELECT y FROM u)"));
        }
    }

    #[test]
    fn narrow_range_caps_the_part_count() {
        let plan = plan("SELECT * FROM numbers WHERE id BETWEEN 1 AND 3", 8);
        assert_eq!(plan.subqueries.len(), 3);
    }

    #[test]
    fn single_row_range_passes_through() {
        let sql = "SELECT * FROM numbers WHERE id BETWEEN 5 AND 5";
        let plan = plan(sql, 4);

        assert!(matches!(plan.merge, MergeStrategy::PassThrough));
        assert_eq!(plan.subqueries, vec![sql.to_string()]);
    }

    #[test]
    fn statements_without_a_range_pass_through() {
        for sql in [
            "SELECT * FROM numbers",
            "SELECT * FROM numbers WHERE id > 5",
            "SELECT * FROM numbers WHERE id BETWEEN 1 AND x",
            "SELECT * FROM numbers WHERE id NOT BETWEEN 1 AND 100",
            "SELECT * FROM numbers WHERE id BETWEEN 100 AND 1",
        ] {
            let plan = plan(sql, 4);
            assert!(
                matches!(plan.merge, MergeStrategy::PassThrough),
                "expected pass-through for {sql}"
            );
            assert_eq!(plan.subqueries, vec![sql.to_string()]);
        }
    }

    #[test]
    fn computed_between_subjects_pass_through() {
        for sql in [
            "SELECT * FROM numbers WHERE id + 1 BETWEEN 1 AND 100",
            "SELECT * FROM numbers WHERE random() * 100 BETWEEN 1 AND 100",
            "SELECT * FROM numbers WHERE (id) BETWEEN 1 AND 100",
        ] {
            let plan = plan(sql, 4);
            assert!(
                matches!(plan.merge, MergeStrategy::PassThrough),
                "expected pass-through for {sql}"
            );
            assert_eq!(plan.subqueries, vec![sql.to_string()]);
        }
    }

    #[test]
    fn shapes_the_planner_cannot_prove_safe_pass_through() {
        for sql in [
            "SELECT * FROM a JOIN b ON a.id = b.id WHERE a.id BETWEEN 1 AND 100",
            "SELECT * FROM numbers WHERE id BETWEEN 1 AND 100 ORDER BY id",
            "SELECT * FROM numbers WHERE id BETWEEN 1 AND 100 LIMIT 10",
            "SELECT DISTINCT x FROM numbers WHERE id BETWEEN 1 AND 100",
            "WITH t AS (SELECT 1) SELECT * FROM numbers WHERE id BETWEEN 1 AND 100",
            "SELECT x FROM numbers WHERE id BETWEEN 1 AND 100 UNION SELECT x FROM other",
            "SELECT COUNT(DISTINCT x) FROM numbers WHERE id BETWEEN 1 AND 100",
            "SELECT upper(name) FROM numbers WHERE id BETWEEN 1 AND 100",
            "SELECT SUM(x) OVER () FROM numbers WHERE id BETWEEN 1 AND 100",
            "DELETE FROM numbers WHERE id BETWEEN 1 AND 100",
            "SELECT 1; SELECT 2",
            "not sql at all",
        ] {
            let plan = plan(sql, 4);
            assert!(
                matches!(plan.merge, MergeStrategy::PassThrough),
                "expected pass-through for {sql}"
            );
        }
    }

    #[test]
    fn global_count_plans_an_aggregate_fold() {
        let plan = plan(
            "SELECT COUNT(*) AS c FROM numbers WHERE id BETWEEN 1 AND 100000",
            4,
        );

        assert_eq!(plan.subqueries.len(), 4);
        let aggregate = aggregate_plan(&plan);
        assert_eq!(aggregate.columns.len(), 1);
        assert_eq!(aggregate.columns[0].name, "c");
        assert_eq!(aggregate.columns[0].kind, ColumnKind::Count);
        assert!(aggregate.having.is_none());
    }

    #[test]
    fn unaliased_aggregate_takes_the_function_name() {
        let plan = plan("SELECT COUNT(*) FROM numbers WHERE id BETWEEN 1 AND 100", 2);

        let aggregate = aggregate_plan(&plan);
        assert_eq!(aggregate.columns[0].name, "count");
    }

    #[test]
    fn group_by_alias_classifies_keys() {
        let plan = plan(
            "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
             WHERE id BETWEEN 1 AND 100000 GROUP BY m",
            4,
        );

        let aggregate = aggregate_plan(&plan);
        assert_eq!(aggregate.columns[0].kind, ColumnKind::Key);
        assert_eq!(aggregate.columns[0].name, "m");
        assert_eq!(aggregate.columns[1].kind, ColumnKind::Count);
    }

    #[test]
    fn group_by_expression_text_classifies_keys() {
        let plan = plan(
            "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
             WHERE id BETWEEN 1 AND 100000 GROUP BY id % 10",
            4,
        );

        let aggregate = aggregate_plan(&plan);
        assert_eq!(aggregate.columns[0].kind, ColumnKind::Key);
    }

    #[test]
    fn group_key_missing_from_projection_passes_through() {
        let plan = plan(
            "SELECT COUNT(*) AS c FROM numbers \
             WHERE id BETWEEN 1 AND 100000 GROUP BY id % 10",
            4,
        );

        assert!(matches!(plan.merge, MergeStrategy::PassThrough));
    }

    #[test]
    fn having_is_stripped_and_recorded() {
        let plan = plan(
            "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
             WHERE id BETWEEN 1 AND 100000 GROUP BY m HAVING c > 5000",
            4,
        );

        let aggregate = aggregate_plan(&plan);
        assert!(aggregate.having.is_some());
        for subquery in &plan.subqueries {
            assert!(!subquery.to_uppercase().contains("HAVING"));
        }
    }

    #[test]
    fn having_on_aggregate_text_resolves_to_its_column() {
        let plan = plan(
            "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
             WHERE id BETWEEN 1 AND 100000 GROUP BY m HAVING COUNT(*) > 5000",
            4,
        );

        let aggregate = aggregate_plan(&plan);
        let having = aggregate.having.as_ref().unwrap().to_string();
        assert!(having.contains("\"c\""), "rewritten predicate: {having}");
    }

    #[test]
    fn unresolvable_having_passes_through() {
        let plan = plan(
            "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
             WHERE id BETWEEN 1 AND 100000 GROUP BY m HAVING z > 5000",
            4,
        );

        assert!(matches!(plan.merge, MergeStrategy::PassThrough));
    }

    #[test]
    fn avg_decomposes_into_sum_and_count() {
        let plan = plan(
            "SELECT AVG(amount) AS a FROM numbers WHERE id BETWEEN 1 AND 100",
            2,
        );

        let aggregate = aggregate_plan(&plan);
        assert!(matches!(aggregate.columns[0].kind, ColumnKind::Avg { .. }));
        for subquery in &plan.subqueries {
            assert!(subquery.contains("SUM(amount) AS __part_sum_0"));
            assert!(subquery.contains("COUNT(amount) AS __part_cnt_0"));
            assert!(!subquery.to_uppercase().contains("AVG"));
        }
    }

    #[test]
    fn mixed_aggregates_keep_projection_order() {
        let plan = plan(
            "SELECT id % 10 AS m, SUM(v) AS s, MIN(v) AS lo, MAX(v) AS hi FROM numbers \
             WHERE id BETWEEN 1 AND 1000 GROUP BY m",
            4,
        );

        let aggregate = aggregate_plan(&plan);
        let kinds: Vec<&ColumnKind> = aggregate.columns.iter().map(|c| &c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                &ColumnKind::Key,
                &ColumnKind::Sum,
                &ColumnKind::Min,
                &ColumnKind::Max
            ]
        );
    }
}
