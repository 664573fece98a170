/// Minimal classification of the script language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptKind {
    /// Traditional classic scripts (JavaScript).
    #[default]
    Classic,
    /// `<script type="module">`.
    Module,
    /// Data blocks and other languages; never executed.
    Unknown,
}

impl ScriptKind {
    pub fn classify(script_type: Option<&str>) -> Self {
        let Some(value) = script_type else {
            return Self::Classic;
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "text/javascript" | "application/javascript" | "text/ecmascript"
            | "application/ecmascript" | "application/x-javascript" => Self::Classic,
            "module" | "text/javascript+module" => Self::Module,
            _ => Self::Unknown,
        }
    }
}

/// Where the script source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline { code: String },
    External { src: String },
}

/// Everything the load pipeline needs to run one `<script>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub index: usize,
    pub kind: ScriptKind,
    pub source: ScriptSource,
}

impl ScriptDescriptor {
    /// Describe a script element from its `type` and `src` attributes and
    /// its text. A non-empty `src` wins over inline text.
    pub fn describe(index: usize, script_type: Option<&str>, src: Option<&str>, text: String) -> Self {
        let kind = ScriptKind::classify(script_type);
        let source = match src.map(str::trim).filter(|src| !src.is_empty()) {
            Some(src) => ScriptSource::External {
                src: src.to_string(),
            },
            None => ScriptSource::Inline { code: text },
        };
        Self {
            index,
            kind,
            source,
        }
    }

    /// Name reported with evaluation errors.
    pub fn origin_name(&self) -> Option<&str> {
        match &self.source {
            ScriptSource::External { src } => Some(src),
            ScriptSource::Inline { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_script_types() {
        assert_eq!(ScriptKind::classify(None), ScriptKind::Classic);
        assert_eq!(ScriptKind::classify(Some(" Text/JavaScript ")), ScriptKind::Classic);
        assert_eq!(ScriptKind::classify(Some("module")), ScriptKind::Module);
        assert_eq!(ScriptKind::classify(Some("application/json")), ScriptKind::Unknown);
    }

    #[test]
    fn external_source_wins_over_text() {
        let script = ScriptDescriptor::describe(0, None, Some(" a.js "), "ignored".into());
        assert_eq!(script.source, ScriptSource::External { src: "a.js".into() });
        assert_eq!(script.origin_name(), Some("a.js"));

        let inline = ScriptDescriptor::describe(1, None, Some(""), "x = 1".into());
        assert_eq!(inline.source, ScriptSource::Inline { code: "x = 1".into() });
        assert_eq!(inline.origin_name(), None);
    }
}
