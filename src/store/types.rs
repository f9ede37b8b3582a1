//! ConfigDB records as the generator sees them. Layer trees are already assembled.

use std::collections::BTreeMap;

/// GDI resource id (`gdi_oid`), unique across all ConfigDB resource tables.
pub type ResourceId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwsType {
    Wms,
    Wfs,
}

impl OwsType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwsType::Wms => "WMS",
            OwsType::Wfs => "WFS",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    /// PostgreSQL/PostGIS, served as a vector layer.
    Database,
    /// File directory, served as a raster layer.
    Directory,
}

impl InfoKind {
    pub fn parse(info_type: &str, sql: Option<String>, module: Option<String>) -> Option<Self> {
        match info_type {
            "wms" => Some(InfoKind::Wms),
            "sql" => Some(InfoKind::Sql(sql)),
            "module" => Some(InfoKind::Module(module)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InfoKind::Wms => "wms",
            InfoKind::Sql(_) => "sql",
            InfoKind::Module(_) => "module",
        }
    }
}

impl ConnectionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "database" => Some(ConnectionType::Database),
            "directory" => Some(ConnectionType::Directory),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct OwsService {
    pub gdi_oid: ResourceId,
    pub ows_type: OwsType,
    pub name: String,
    pub description: Option<String>,
    /// Raw JSON text with service metadata (title, contact, crs list, ...).
    pub ows_metadata: Option<String>,
    pub root_layer: LayerNode,
}

/// A service whose layer tree could not be assembled.
#[derive(Clone, Debug)]
pub struct BrokenService {
    pub ows_type: OwsType,
    pub name: String,
    pub reason: String,
}

/// Services of one OWS type, in name order. Broken services are kept apart so the
/// healthy ones can still be generated.
#[derive(Clone, Debug, Default)]
pub struct OwsServices {
    pub services: Vec<OwsService>,
    pub broken: Vec<BrokenService>,
}

#[derive(Clone, Debug)]
pub struct LayerNode {
    pub gdi_oid: ResourceId,
    pub name: String,
    pub title: Option<String>,
    /// File name of the custom legend image, set only when the layer has one.
    pub legend_image: Option<String>,
    pub kind: LayerKind,
}

#[derive(Clone, Debug)]
pub enum LayerKind {
    Group(GroupLayer),
    Data(DataLayer),
}

#[derive(Clone, Debug, Default)]
pub struct GroupLayer {
    pub facade: bool,
    /// Sub layers in layer order.
    pub children: Vec<LayerNode>,
}

#[derive(Clone, Debug)]
pub struct DataLayer {
    /// Transparency in percent (0 = opaque).
    pub transparency: i32,
    pub qgs_style: Option<String>,
    pub data_set: DataSetRef,
    pub attributes: Vec<Attribute>,
    pub info_template: Option<InfoTemplate>,
    /// Feature report as `<template name>.<format>`.
    pub feature_report: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InfoKind {
    /// Feature info is requested from QGIS Server.
    Wms,
    /// Query run against the layer's own database.
    Sql(Option<String>),
    /// Module of the feature info service.
    Module(Option<String>),
}

/// Custom feature info of a data layer (`template_info`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InfoTemplate {
    pub kind: InfoKind,
    /// HTML template rendered by the feature info service.
    pub template: Option<String>,
}

/// A data set view together with its data set and data source.
#[derive(Clone, Debug)]
pub struct DataSetRef {
    pub view_oid: ResourceId,
    pub data_set_oid: ResourceId,
    pub data_source_oid: ResourceId,
    pub connection_type: ConnectionType,
    /// Database URL or raster directory.
    pub connection: String,
    /// `schema.table` (schema defaults to `public`) or raster file name.
    pub data_set_name: String,
    /// Explicit primary key, needed for views.
    pub primary_key: Option<String>,
    pub geometry_column: Option<String>,
}

impl DataSetRef {
    /// Schema and table name of a database data set.
    pub fn schema_and_table(&self) -> (String, String) {
        match self.data_set_name.split_once('.') {
            Some((schema, table)) => (schema.to_string(), table.to_string()),
            None => ("public".to_string(), self.data_set_name.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Attribute {
    pub gdi_oid: ResourceId,
    pub name: String,
    /// Plain alias or JSON object with an `alias` key.
    pub alias: Option<String>,
    /// Display format, e.g. a number or date format string.
    pub format: Option<String>,
    pub display_field: bool,
}

#[derive(Clone, Debug)]
pub struct PrintTemplate {
    pub gdi_oid: ResourceId,
    pub name: String,
    /// `<Layout>` XML spliced into print projects.
    pub print_layout: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DocumentTemplate {
    pub gdi_oid: ResourceId,
    pub name: String,
    pub report_filename: String,
}

#[derive(Clone, Debug)]
pub struct BackgroundLayer {
    pub gdi_oid: ResourceId,
    pub name: String,
    pub qgis_datasource: String,
}

#[derive(Clone, Debug)]
pub struct EditDataset {
    pub gdi_oid: ResourceId,
    pub name: String,
    pub data_set: DataSetRef,
    pub attributes: Vec<Attribute>,
    /// 0 = not searchable, 1 = searchable, 2 = searchable by default.
    pub searchable: i32,
    pub facet: Option<String>,
    pub filter_word: Option<String>,
}

/// One `iam.resource_permission` row joined with its role and resource.
#[derive(Clone, Debug)]
pub struct PermissionRow {
    pub role: String,
    pub resource_id: ResourceId,
    pub table_name: String,
    pub resource_name: String,
    pub read: bool,
    pub write: bool,
    pub priority: i32,
}

#[derive(Clone, Debug, Default)]
pub struct Principals {
    pub users: Vec<UserRecord>,
    pub groups: Vec<GroupRecord>,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct UserRecord {
    pub name: String,
    pub groups: Vec<String>,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct GroupRecord {
    pub name: String,
    pub roles: Vec<String>,
}

/// Table metadata read from the data set's own database.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableMetadata {
    pub primary_key: Option<String>,
    pub geometry: Option<GeometryInfo>,
    /// Column name to PostgreSQL data type.
    pub column_types: BTreeMap<String, String>,
    /// Data extent `[xmin, ymin, xmax, ymax]`, absent for empty tables.
    pub extent: Option<[f64; 4]>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeometryInfo {
    pub column: String,
    /// PostGIS type, e.g. `MULTIPOLYGON`.
    pub geometry_type: String,
    pub srid: i32,
}
