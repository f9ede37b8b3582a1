//! Assemble layer trees from flat ConfigDB rows.

use crate::error::StoreError;
use crate::store::types::*;
use std::collections::{HashMap, HashSet};

/// `ows_layer` joined with its group/data extension and data set chain.
#[derive(Clone, Debug, Default, sqlx::FromRow)]
pub struct LayerRow {
    pub gdi_oid: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    pub layer_type: String,
    pub title: Option<String>,
    pub facade: Option<bool>,
    pub layer_transparency: Option<i32>,
    pub qgs_style: Option<String>,
    /// Legend image file name, `NULL` without a custom legend image.
    pub legend_image: Option<String>,
    pub info_type: Option<String>,
    pub info_sql: Option<String>,
    pub info_module: Option<String>,
    pub info_template: Option<String>,
    pub feature_report: Option<String>,
    #[sqlx(flatten)]
    pub data_set: DataSetRow,
}

impl LayerRow {
    fn info_template(&self) -> Option<InfoTemplate> {
        let info_type = self.info_type.as_deref()?;
        let Some(kind) = InfoKind::parse(info_type, self.info_sql.clone(), self.info_module.clone()) else {
            tracing::warn!(layer = %self.name, info_type, "ignoring info template of unknown type");
            return None;
        };
        Some(InfoTemplate {
            kind,
            template: self.info_template.clone(),
        })
    }
}

/// Data set view, data set and data source columns, all nullable through outer joins.
#[derive(Clone, Debug, Default, sqlx::FromRow)]
pub struct DataSetRow {
    pub view_oid: Option<i64>,
    pub geometry_column: Option<String>,
    pub data_set_oid: Option<i64>,
    pub data_set_name: Option<String>,
    pub primary_key: Option<String>,
    pub data_source_oid: Option<i64>,
    pub connection_type: Option<String>,
    pub connection: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AttributeRow {
    pub gdi_oid: i64,
    pub view_oid: i64,
    pub name: String,
    pub alias: Option<String>,
    pub format: Option<String>,
    pub displayfield: Option<bool>,
}

/// `group_layer` row; rows must arrive in layer order.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct GroupLayerRow {
    pub group_oid: i64,
    pub sub_oid: i64,
}

impl DataSetRow {
    /// Resolve into a [`DataSetRef`]; `owner` names the layer or dataset for error messages.
    pub fn resolve(&self, owner: &str) -> Result<DataSetRef, StoreError> {
        let missing = |what: &str| StoreError::MissingData(format!("{}: no {}", owner, what));
        let connection_type = self
            .connection_type
            .as_deref()
            .ok_or_else(|| missing("data source"))?;
        let connection_type = ConnectionType::parse(connection_type).ok_or_else(|| {
            StoreError::MissingData(format!(
                "{}: unsupported connection type '{}'",
                owner, connection_type
            ))
        })?;
        Ok(DataSetRef {
            view_oid: self.view_oid.ok_or_else(|| missing("data set view"))?,
            data_set_oid: self.data_set_oid.ok_or_else(|| missing("data set"))?,
            data_source_oid: self.data_source_oid.ok_or_else(|| missing("data source"))?,
            connection_type,
            connection: self.connection.clone().ok_or_else(|| missing("connection"))?,
            data_set_name: self.data_set_name.clone().ok_or_else(|| missing("data set name"))?,
            primary_key: self.primary_key.clone().filter(|s| !s.is_empty()),
            geometry_column: self.geometry_column.clone().filter(|s| !s.is_empty()),
        })
    }
}

pub struct LayerIndex {
    layers: HashMap<i64, LayerRow>,
    children: HashMap<i64, Vec<i64>>,
    attributes: HashMap<i64, Vec<Attribute>>,
}

impl LayerIndex {
    pub fn new(layers: Vec<LayerRow>, group_layers: Vec<GroupLayerRow>, attributes: Vec<AttributeRow>) -> Self {
        let layers = layers.into_iter().map(|l| (l.gdi_oid, l)).collect();
        let children = group_layers.into_iter().fold(HashMap::new(), |mut m: HashMap<i64, Vec<i64>>, gl| {
            m.entry(gl.group_oid).or_default().push(gl.sub_oid);
            m
        });
        let attributes = attributes.into_iter().fold(HashMap::new(), |mut m: HashMap<i64, Vec<Attribute>>, a| {
            m.entry(a.view_oid).or_default().push(Attribute {
                gdi_oid: a.gdi_oid,
                name: a.name,
                alias: a.alias,
                format: a.format.filter(|f| !f.is_empty()),
                display_field: a.displayfield.unwrap_or(false),
            });
            m
        });
        LayerIndex {
            layers,
            children,
            attributes,
        }
    }

    pub fn attributes_of_view(&self, view_oid: i64) -> Vec<Attribute> {
        self.attributes.get(&view_oid).cloned().unwrap_or_default()
    }

    /// Build the subtree below `root`. Dangling ids and cycles are missing data.
    pub fn build(&self, root: i64) -> Result<LayerNode, StoreError> {
        let mut path = HashSet::new();
        self.build_node(root, &mut path)
    }

    fn build_node(&self, oid: i64, path: &mut HashSet<i64>) -> Result<LayerNode, StoreError> {
        let row = self
            .layers
            .get(&oid)
            .ok_or_else(|| StoreError::MissingData(format!("layer {} does not exist", oid)))?;
        if !path.insert(oid) {
            return Err(StoreError::MissingData(format!(
                "layer '{}' contains itself",
                row.name
            )));
        }

        let kind = match row.layer_type.as_str() {
            "group" => {
                let mut children = Vec::new();
                for sub in self.children.get(&oid).map(Vec::as_slice).unwrap_or(&[]) {
                    children.push(self.build_node(*sub, path)?);
                }
                LayerKind::Group(GroupLayer {
                    facade: row.facade.unwrap_or(false),
                    children,
                })
            }
            "data" => {
                let data_set = row.data_set.resolve(&format!("layer '{}'", row.name))?;
                LayerKind::Data(DataLayer {
                    transparency: row.layer_transparency.unwrap_or(0),
                    qgs_style: row.qgs_style.clone().filter(|s| !s.trim().is_empty()),
                    attributes: self.attributes_of_view(data_set.view_oid),
                    data_set,
                    info_template: row.info_template(),
                    feature_report: row.feature_report.clone(),
                })
            }
            other => {
                return Err(StoreError::MissingData(format!(
                    "layer '{}' has unknown type '{}'",
                    row.name, other
                )))
            }
        };
        path.remove(&oid);

        Ok(LayerNode {
            gdi_oid: oid,
            name: row.name.clone(),
            title: row.title.clone().filter(|s| !s.is_empty()),
            legend_image: row.legend_image.clone(),
            kind,
        })
    }
}
