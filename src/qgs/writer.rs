//! Render QGS project documents from layer trees and write them to the project directory.

use crate::error::{GenerateError, QgsError};
use crate::qgs::layers::{MapLayer, MapLayerType, TreeItem};
use crate::qgs::style::check_well_formed;
use crate::qgs::template::Template;
use crate::report::StageLog;
use quick_xml::escape::escape;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const SERVICE_TEMPLATE: &str = "service.qgs";

/// WMS capabilities metadata of a project.
#[derive(Clone, Debug, Default)]
pub struct WmsProperties {
    pub service_title: String,
    pub service_abstract: String,
    pub keywords: Vec<String>,
    pub contact_person: String,
    pub contact_organization: String,
    pub contact_position: String,
    pub contact_phone: String,
    pub contact_mail: String,
    pub fees: String,
    pub access_constraints: String,
    pub root_name: String,
    pub root_title: String,
    pub crs_list: Vec<String>,
    pub extent: Option<Vec<f64>>,
    pub url: String,
}

impl WmsProperties {
    /// Read `wms_wfs.ows_metadata` JSON. Invalid JSON is logged and ignored.
    pub fn from_metadata(ows_metadata: Option<&str>, log: &mut StageLog) -> Self {
        let meta = match ows_metadata.filter(|m| !m.trim().is_empty()) {
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(v) => v,
                Err(e) => {
                    log.error(format!("Invalid JSON in wms_wfs.ows_metadata: {}", e));
                    Value::Null
                }
            },
            None => Value::Null,
        };
        let text = |key: &str| meta.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let list = |key: &str| -> Vec<String> {
            meta.get(key)
                .and_then(Value::as_str)
                .map(|s| s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect())
                .unwrap_or_default()
        };
        let mut crs_list = list("crs_list");
        if crs_list.is_empty() {
            crs_list.push("EPSG:2056".into());
        }
        let extent = meta
            .get("wms_extent")
            .and_then(Value::as_str)
            .and_then(|s| s.split(',').map(|c| c.trim().parse::<f64>().ok()).collect());
        WmsProperties {
            service_title: text("service_title"),
            service_abstract: text("service_abstract"),
            keywords: list("keywords"),
            contact_person: text("contact_person"),
            contact_organization: text("contact_organization"),
            contact_position: text("contact_position"),
            contact_phone: text("contact_phone"),
            contact_mail: text("contact_mail"),
            fees: text("fees"),
            access_constraints: text("access_constraints"),
            root_title: text("wms_root_title"),
            crs_list,
            extent,
            ..Default::default()
        }
    }
}

/// WFS layer list and WFS-T write permissions of a project.
#[derive(Clone, Debug, Default)]
pub struct WfsProperties {
    /// Ids of all published vector layers.
    pub layers: Vec<String>,
    /// Ids of layers with any write permission.
    pub writable: Vec<String>,
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct Project<'a> {
    pub title: String,
    pub items: Vec<TreeItem>,
    pub layouts: Vec<&'a str>,
    pub extent: [f64; 4],
    pub wms: Option<WmsProperties>,
    pub wfs: Option<WfsProperties>,
    pub selection_color: [u8; 4],
}

fn render_layer_tree(items: &[TreeItem], depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth + 2);
    for item in items {
        match item {
            TreeItem::Group { name, items, .. } => {
                let _ = writeln!(
                    out,
                    "{}<layer-tree-group name=\"{}\" expanded=\"1\" checked=\"Qt::Checked\">",
                    pad,
                    escape(name.as_str())
                );
                let _ = writeln!(out, "{}  <customproperties/>", pad);
                render_layer_tree(items, depth + 1, out);
                let _ = writeln!(out, "{}</layer-tree-group>", pad);
            }
            TreeItem::Layer(layer) => {
                let _ = writeln!(
                    out,
                    "{}<layer-tree-layer id=\"{}\" name=\"{}\" expanded=\"0\" checked=\"Qt::Checked\" source=\"{}\" providerKey=\"{}\"><customproperties/></layer-tree-layer>",
                    pad,
                    escape(layer.id.as_str()),
                    escape(layer.title.as_str()),
                    escape(layer.datasource.as_str()),
                    layer.provider
                );
            }
        }
    }
}

fn extent_xml(extent: &[f64; 4]) -> String {
    format!(
        "<xmin>{}</xmin><ymin>{}</ymin><xmax>{}</xmax><ymax>{}</ymax>",
        extent[0], extent[1], extent[2], extent[3]
    )
}

fn render_map_layer(layer: &MapLayer, out: &mut String) {
    let mut attrs = format!("type=\"{}\"", layer.layer_type.as_str());
    if let Some(geometry) = &layer.geometry {
        let _ = write!(attrs, " geometry=\"{}\"", escape(geometry.as_str()));
    }
    if !layer.style.attrs.is_empty() {
        attrs.push(' ');
        attrs.push_str(&layer.style.attrs);
    }
    let _ = writeln!(out, "    <maplayer {}>", attrs);
    if let Some(extent) = &layer.extent {
        let _ = writeln!(out, "      <extent>{}</extent>", extent_xml(extent));
    }
    let _ = writeln!(out, "      <id>{}</id>", escape(layer.id.as_str()));
    let _ = writeln!(out, "      <datasource>{}</datasource>", escape(layer.datasource.as_str()));
    let _ = writeln!(out, "      <shortname>{}</shortname>", escape(layer.name.as_str()));
    let _ = writeln!(out, "      <layername>{}</layername>", escape(layer.title.as_str()));
    let _ = writeln!(out, "      <srs><spatialrefsys><authid>EPSG:2056</authid></spatialrefsys></srs>");
    let _ = writeln!(out, "      <provider encoding=\"UTF-8\">{}</provider>", layer.provider);
    let _ = writeln!(out, "      <mapTip></mapTip>");
    let _ = writeln!(out, "{}", layer.style.body);
    let _ = writeln!(out, "    </maplayer>");
}

fn string_property(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "    <{0} type=\"QString\">{1}</{0}>", key, escape(value));
}

fn list_property(out: &mut String, key: &str, values: &[String]) {
    let _ = write!(out, "    <{} type=\"QStringList\">", key);
    for v in values {
        let _ = write!(out, "<value>{}</value>", escape(v.as_str()));
    }
    let _ = writeln!(out, "</{}>", key);
}

fn render_properties(project: &Project<'_>) -> String {
    let mut out = String::new();
    let [r, g, b, a] = project.selection_color;
    let _ = writeln!(
        out,
        "    <Gui><SelectionColorRedPart type=\"int\">{}</SelectionColorRedPart><SelectionColorGreenPart type=\"int\">{}</SelectionColorGreenPart><SelectionColorBluePart type=\"int\">{}</SelectionColorBluePart><SelectionColorAlphaPart type=\"int\">{}</SelectionColorAlphaPart></Gui>",
        r, g, b, a
    );
    if let Some(wms) = &project.wms {
        let _ = writeln!(out, "    <WMSServiceCapabilities type=\"bool\">true</WMSServiceCapabilities>");
        string_property(&mut out, "WMSServiceTitle", &wms.service_title);
        string_property(&mut out, "WMSServiceAbstract", &wms.service_abstract);
        list_property(&mut out, "WMSKeywordList", &wms.keywords);
        string_property(&mut out, "WMSContactPerson", &wms.contact_person);
        string_property(&mut out, "WMSContactOrganization", &wms.contact_organization);
        string_property(&mut out, "WMSContactPosition", &wms.contact_position);
        string_property(&mut out, "WMSContactPhone", &wms.contact_phone);
        string_property(&mut out, "WMSContactMail", &wms.contact_mail);
        string_property(&mut out, "WMSFees", &wms.fees);
        string_property(&mut out, "WMSAccessConstraints", &wms.access_constraints);
        string_property(&mut out, "WMSRootName", &wms.root_name);
        string_property(&mut out, "WMSRootTitle", &wms.root_title);
        list_property(&mut out, "WMSCrsList", &wms.crs_list);
        if let Some(extent) = &wms.extent {
            let values: Vec<String> = extent.iter().map(|c| c.to_string()).collect();
            list_property(&mut out, "WMSExtent", &values);
        }
        string_property(&mut out, "WMSUrl", &wms.url);
    }
    if let Some(wfs) = &project.wfs {
        list_property(&mut out, "WFSLayers", &wfs.layers);
        let _ = writeln!(out, "    <WFSTLayers>");
        for op in ["Update", "Insert", "Delete"] {
            out.push_str("  ");
            list_property(&mut out, op, &wfs.writable);
        }
        let _ = writeln!(out, "    </WFSTLayers>");
        string_property(&mut out, "WFSUrl", &wfs.url);
    }
    out
}

/// Render a project document. The result is checked for well-formedness.
pub fn render_project(template: &Template, project: &Project<'_>) -> Result<String, QgsError> {
    let mut layer_tree = String::new();
    render_layer_tree(&project.items, 0, &mut layer_tree);

    let mut map_layers = String::new();
    for item in &project.items {
        for layer in item.map_layers() {
            render_map_layer(layer, &mut map_layers);
        }
    }

    let bindings: HashMap<&str, String> = HashMap::from([
        ("title", escape(project.title.as_str()).into_owned()),
        ("layer_tree", layer_tree.trim_end().to_string()),
        ("extent", format!("      {}", extent_xml(&project.extent))),
        ("map_layers", map_layers.trim_end().to_string()),
        ("layouts", project.layouts.join("\n")),
        ("properties", render_properties(project).trim_end().to_string()),
    ]);
    let qgs = template.render(&bindings)?;
    check_well_formed(&qgs)?;
    Ok(qgs)
}

/// Load the project template from `dir`, falling back to the built-in one.
pub async fn load_template(dir: Option<&Path>) -> Result<Template, QgsError> {
    if let Some(dir) = dir {
        let path = dir.join(SERVICE_TEMPLATE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => return Template::parse(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(QgsError::Template(format!("{}: {}", path.display(), e))),
        }
    }
    Template::parse(include_str!("../../templates/service.qgs"))
}

/// Write a rendered project, replacing any previous version.
pub async fn write_project(dir: &Path, filename: &str, qgs: &str, log: &mut StageLog) -> Result<PathBuf, GenerateError> {
    let path = dir.join(filename);
    log.info(format!("Writing '{}' QGIS project", filename));
    tokio::fs::create_dir_all(dir).await.map_err(|source| GenerateError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    tokio::fs::write(&path, qgs).await.map_err(|source| GenerateError::Write {
        path: path.clone(),
        source,
    })?;
    log.debug(format!("Wrote {}", path.display()));
    Ok(path)
}

/// Vector layers below `items`.
pub fn vector_layers<'a>(items: &'a [TreeItem]) -> impl Iterator<Item = &'a MapLayer> {
    items
        .iter()
        .flat_map(|i| i.map_layers())
        .filter(|l| l.layer_type == MapLayerType::Vector)
}
