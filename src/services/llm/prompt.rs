use crate::models::QueryRecord;
use crate::utils::StringExt;
use crate::utils::tail_chars;

/// Stack context sent with the query is cut to its last characters
pub const CONTEXT_CHARS: usize = 500;

/// Deterministic optimization prompt for one captured query
pub fn build_optimization_prompt(record: &QueryRecord) -> String {
    let context = record
        .stack_trace
        .clean()
        .map(|trace| tail_chars(&trace, CONTEXT_CHARS).to_string())
        .unwrap_or_else(|| "No context".to_string());

    format!(
        r#"Analyze this SQL query for potential optimizations:

Query: {query}
Execution Time: {duration} seconds
Context: {context}

Please provide:
1. A detailed analysis of the query performance issues
2. Specific optimization suggestions
3. Rewritten optimized query if applicable
4. Index suggestions if applicable
5. Any Django ORM improvements if the query comes from Django

Format your response as a flat JSON object with these keys:
- analysis
- optimization_suggestions
- optimized_query (if applicable)
- index_suggestions
- django_orm_improvements (if applicable)
"#,
        query = record.query,
        duration = record.duration,
        context = context,
    )
}
