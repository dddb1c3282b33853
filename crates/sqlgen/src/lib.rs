//! SQL generation: compiles condition trees into dialect-specific WHERE
//! fragments and renders the paginated hot-tier query template.
//!
//! The hot tier speaks the `$n`-placeholder dialect of the row store; the
//! cold tier speaks the `?` dialect of the columnar engine. Both fragments
//! are produced from one classification pass so their result sets agree.

mod render;
pub use render::{ident, quote_attr, Dialect, Fragment, SqlBuilder, SqlValue};

mod compile;
pub use compile::{
    compile_cold, compile_pair, pushdown_stats, CompiledCondition, ConditionCompiler,
    PushdownStats,
};

mod template;
pub use template::{build_cold_predicate, build_hot_query, resolve_sort, SortKey, TableNames};
