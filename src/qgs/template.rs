//! `{{ name }}` placeholder templates for QGS project files.

use crate::error::QgsError;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern"))
}

#[derive(Clone, Debug)]
pub struct Template {
    text: String,
}

impl Template {
    /// Every `{{` must open a valid placeholder.
    pub fn parse(text: impl Into<String>) -> Result<Self, QgsError> {
        let text = text.into();
        let opened = text.matches("{{").count();
        let valid = placeholder().find_iter(&text).count();
        if opened != valid {
            return Err(QgsError::Template(format!(
                "{} malformed placeholder(s)",
                opened - valid.min(opened)
            )));
        }
        Ok(Template { text })
    }

    pub fn placeholders(&self) -> Vec<&str> {
        placeholder()
            .captures_iter(&self.text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Substitute all placeholders. Values are inserted as is; callers escape text content.
    pub fn render(&self, bindings: &HashMap<&str, String>) -> Result<String, QgsError> {
        let mut out = String::with_capacity(self.text.len());
        let mut last = 0;
        for caps in placeholder().captures_iter(&self.text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else { continue };
            let value = bindings
                .get(name.as_str())
                .ok_or_else(|| QgsError::Unbound(name.as_str().to_string()))?;
            out.push_str(&self.text[last..whole.start()]);
            out.push_str(value);
            last = whole.end();
        }
        out.push_str(&self.text[last..]);
        Ok(out)
    }
}
