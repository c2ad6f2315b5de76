use crate::tool::{CallStyle, ParamKind, ToolDescriptor, ToolParam};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Default tool set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tools advertised to the completion engine when `[[tools]]` is absent:
/// the reference worker's `search` tool.
pub fn default_tools() -> Vec<ToolDescriptor> {
    vec![ToolDescriptor {
        name: "search".into(),
        description: "Search the web using a local SearXNG instance".into(),
        call_style: CallStyle::Direct,
        params: vec![
            param("query", ParamKind::String, "The search query string"),
            param(
                "category",
                ParamKind::String,
                "Search category (general, images, news, etc.)",
            ),
            param("language", ParamKind::String, "Language code for results"),
            param(
                "max_results",
                ParamKind::Integer,
                "Maximum number of results to return",
            ),
        ],
        required: vec!["query".into()],
    }]
}

fn param(name: &str, kind: ParamKind, description: &str) -> ToolParam {
    ToolParam {
        name: name.into(),
        kind,
        description: description.into(),
    }
}
