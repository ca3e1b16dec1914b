use crate::catalog::Category;

/// Fallback when the operation (and so its category) is unknown.
pub const FALLBACK_PAGE: &str = "/list/user/";

/// Per-request view of the operator's session. Read-only here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub operator: String,
    /// Page the operator came from, if the session recorded one.
    pub back: Option<String>,
}

impl SessionContext {
    pub fn new(operator: impl Into<String>, back: Option<String>) -> Self {
        Self {
            operator: operator.into(),
            back,
        }
    }
}

/// Where the browser goes next. Depends only on the session and the
/// operation's category, never on how the operation turned out.
pub fn resolve_next(session: &SessionContext, category: Option<Category>) -> String {
    match session.back.as_deref().map(str::trim) {
        Some(back) if !back.is_empty() => back.to_string(),
        _ => category
            .map(Category::listing_page)
            .unwrap_or(FALLBACK_PAGE)
            .to_string(),
    }
}
