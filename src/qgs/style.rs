//! QML style documents: root attributes and body for splicing into `<maplayer>`, alias rewriting.

use crate::error::QgsError;
use crate::store::Attribute;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// A parsed `<qgis>` style: root attributes (without `version`) and the inner XML.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QmlStyle {
    pub attrs: String,
    pub body: String,
}

/// Check that `xml` is well-formed. Several top-level elements are allowed so
/// fragments such as print layouts pass.
pub fn check_well_formed(xml: &str) -> Result<(), QgsError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| QgsError::Xml(format!("unexpected end tag at {}", reader.buffer_position())))?;
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(QgsError::Xml(format!("at {}: {}", reader.buffer_position(), e))),
        }
    }
    if depth != 0 {
        return Err(QgsError::Xml(format!("{} unclosed element(s)", depth)));
    }
    Ok(())
}

/// Parse a QML document. With `attributes` given, its `<aliases>` block is replaced
/// by one alias per attribute in order.
pub fn parse_qml(xml: &str, attributes: &[Attribute]) -> Result<QmlStyle, QgsError> {
    check_well_formed(xml)?;

    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut attrs = None;
    let mut body_start = 0;
    let mut body_end = None;
    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 {
                    if e.name().as_ref() != b"qgis" {
                        return Err(QgsError::Style("root element is not <qgis>".into()));
                    }
                    let mut parts = Vec::new();
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| QgsError::Style(e.to_string()))?;
                        if attr.key.as_ref() == b"version" {
                            continue;
                        }
                        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                        let value = attr.unescape_value().map_err(|e| QgsError::Style(e.to_string()))?;
                        parts.push(format!("{}=\"{}\"", key, escape(&*value)));
                    }
                    attrs = Some(parts.join(" "));
                    body_start = reader.buffer_position() as usize;
                }
                depth += 1;
            }
            Ok(Event::End(_)) => {
                depth -= 1;
                if depth == 0 {
                    body_end = Some(before);
                    break;
                }
            }
            Ok(Event::Empty(e)) if depth == 0 => {
                if e.name().as_ref() != b"qgis" {
                    return Err(QgsError::Style("root element is not <qgis>".into()));
                }
                return Err(QgsError::Style("empty <qgis> style".into()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(QgsError::Xml(e.to_string())),
        }
    }
    let (Some(attrs), Some(body_end)) = (attrs, body_end) else {
        return Err(QgsError::Style("no <qgis> root element".into()));
    };

    let mut body = xml[body_start..body_end].to_string();
    if !attributes.is_empty() {
        body = replace_aliases(&body, attributes);
    }
    Ok(QmlStyle { attrs, body })
}

fn aliases_block() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<aliases\s*/>|<aliases\b[^>]*>.*?</aliases>").expect("aliases pattern"))
}

/// Alias text of an attribute: plain text, or the `alias` key of a JSON object.
pub fn alias_text(attribute: &Attribute) -> String {
    let raw = attribute.alias.as_deref().unwrap_or_default();
    if raw.starts_with('{') {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(v) => {
                if let Some(alias) = v.get("alias").and_then(|a| a.as_str()) {
                    return alias.to_string();
                }
            }
            Err(e) => tracing::warn!(attribute = %attribute.name, error = %e, "alias is not valid JSON"),
        }
    }
    raw.to_string()
}

fn replace_aliases(body: &str, attributes: &[Attribute]) -> String {
    let mut block = String::from("<aliases>");
    for (index, attribute) in attributes.iter().enumerate() {
        block.push_str(&format!(
            "<alias field=\"{}\" index=\"{}\" name=\"{}\"/>",
            escape(attribute.name.as_str()),
            index,
            escape(alias_text(attribute).as_str())
        ));
    }
    block.push_str("</aliases>");

    match aliases_block().find(body) {
        Some(m) => format!("{}{}{}", &body[..m.start()], block, &body[m.end()..]),
        None => format!("{}{}", body, block),
    }
}

/// Built-in styles for layers without a usable QML style.
#[derive(Clone, Debug)]
pub struct DefaultStyles {
    pub point: String,
    pub linestring: String,
    pub polygon: String,
    pub raster: String,
}

impl Default for DefaultStyles {
    fn default() -> Self {
        DefaultStyles {
            point: include_str!("../../templates/point.qml").to_string(),
            linestring: include_str!("../../templates/linestring.qml").to_string(),
            polygon: include_str!("../../templates/polygon.qml").to_string(),
            raster: include_str!("../../templates/raster.qml").to_string(),
        }
    }
}

impl DefaultStyles {
    /// Built-in styles, each replaced by `<dir>/<kind>.qml` when that file exists.
    pub async fn load(dir: Option<&Path>) -> Result<Self, QgsError> {
        let mut styles = DefaultStyles::default();
        let Some(dir) = dir else { return Ok(styles) };
        for (kind, slot) in [
            ("point", &mut styles.point),
            ("linestring", &mut styles.linestring),
            ("polygon", &mut styles.polygon),
            ("raster", &mut styles.raster),
        ] {
            let path = dir.join(format!("{}.qml", kind));
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => *slot = text,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(QgsError::Template(format!("{}: {}", path.display(), e))),
            }
        }
        Ok(styles)
    }

    /// Style for a PostGIS geometry type; `MULTI` variants share the single-part style.
    pub fn for_geometry(&self, geometry_type: &str) -> &str {
        let upper = geometry_type.to_ascii_uppercase();
        match upper.strip_prefix("MULTI").unwrap_or(upper.as_str()) {
            "POINT" => &self.point,
            "LINESTRING" | "CURVE" => &self.linestring,
            _ => &self.polygon,
        }
    }
}
