//! ConfigDB queries against PostgreSQL. Tables live in schemas `gdi_knoten` (resources) and `iam` (principals).

use crate::config::GeneratorConfig;
use crate::error::StoreError;
use crate::store::tree::{AttributeRow, DataSetRow, GroupLayerRow, LayerIndex, LayerRow};
use crate::store::types::*;
use crate::store::{ConfigStore, StoreConnector};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;

const GDI_SCHEMA: &str = "gdi_knoten";
const IAM_SCHEMA: &str = "iam";

fn gdi(table: &str) -> String {
    format!("{}.{}", GDI_SCHEMA, table)
}

fn iam(table: &str) -> String {
    format!("{}.{}", IAM_SCHEMA, quote_ident(table))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct PgConfigStore {
    pool: PgPool,
    /// Pools for data set databases, keyed by connection URL.
    geo_pools: Mutex<HashMap<String, PgPool>>,
}

#[derive(sqlx::FromRow)]
struct EditRow {
    gdi_oid: i64,
    name: String,
    searchable: Option<i32>,
    facet: Option<String>,
    filter_word: Option<String>,
    #[sqlx(flatten)]
    data_set: DataSetRow,
}

impl PgConfigStore {
    /// Connect to the ConfigDB. Any failure here is a connectivity failure.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("ConfigDB: {}", e)))?;
        Ok(PgConfigStore {
            pool,
            geo_pools: Mutex::new(HashMap::new()),
        })
    }

    async fn layer_index(&self) -> Result<LayerIndex, StoreError> {
        let sql = format!(
            r#"
            SELECT l.gdi_oid, l.name, l.type::text AS type, l.title,
                CASE WHEN l.legend_image IS NOT NULL
                    THEN COALESCE(l.legend_filename, l.name || '.png') END AS legend_image,
                g.facade, d.layer_transparency::int4 AS layer_transparency, d.qgs_style,
                ti.info_type::text AS info_type, ti.info_sql, ti.info_module, ti.info_template,
                rt.name || '.' || COALESCE(tj.default_format, 'pdf') AS feature_report,
                v.gdi_oid AS view_oid, v.geometry_column,
                s.gdi_oid AS data_set_oid, s.data_set_name, s.primary_key,
                src.gdi_oid AS data_source_oid, src.connection_type::text AS connection_type, src.connection
            FROM {layer} l
                LEFT JOIN {group} g ON g.gdi_oid = l.gdi_oid
                LEFT JOIN {data} d ON d.gdi_oid = l.gdi_oid
                LEFT JOIN {info} ti ON ti.gdi_oid = d.gdi_oid_templateinfo
                LEFT JOIN {jasper} tj ON tj.gdi_oid = d.gdi_oid_templatejasper
                LEFT JOIN {template} rt ON rt.gdi_oid = tj.gdi_oid
                LEFT JOIN {view} v ON v.gdi_oid = d.gdi_oid_data_set_view
                LEFT JOIN {set} s ON s.gdi_oid = v.gdi_oid_data_set
                LEFT JOIN {source} src ON src.gdi_oid = s.gdi_oid_data_source
            "#,
            info = gdi("template_info"),
            jasper = gdi("template_jasper"),
            template = gdi("template"),
            layer = gdi("ows_layer"),
            group = gdi("ows_layer_group"),
            data = gdi("ows_layer_data"),
            view = gdi("data_set_view"),
            set = gdi("data_set"),
            source = gdi("data_source"),
        );
        tracing::debug!(sql = %sql, "query");
        let layers = sqlx::query_as::<_, LayerRow>(&sql).fetch_all(&self.pool).await?;

        let sql = format!(
            "SELECT gdi_oid_group_layer AS group_oid, gdi_oid_sub_layer AS sub_oid FROM {} ORDER BY gdi_oid_group_layer, layer_order, id",
            gdi("group_layer")
        );
        let group_layers = sqlx::query_as::<_, GroupLayerRow>(&sql).fetch_all(&self.pool).await?;

        let attributes = self.attribute_rows().await?;
        Ok(LayerIndex::new(layers, group_layers, attributes))
    }

    async fn attribute_rows(&self) -> Result<Vec<AttributeRow>, StoreError> {
        let sql = format!(
            "SELECT gdi_oid, gdi_oid_data_set_view AS view_oid, name, alias, format, displayfield FROM {} ORDER BY gdi_oid_data_set_view, gdi_oid",
            gdi("data_set_view_attributes")
        );
        Ok(sqlx::query_as::<_, AttributeRow>(&sql).fetch_all(&self.pool).await?)
    }

    async fn geo_pool(&self, url: &str) -> Result<PgPool, sqlx::Error> {
        let mut pools = self.geo_pools.lock().await;
        if let Some(pool) = pools.get(url) {
            return Ok(pool.clone());
        }
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        pools.insert(url.to_string(), pool.clone());
        Ok(pool)
    }

    async fn inspect_table(&self, data_set: &DataSetRef) -> Result<TableMetadata, sqlx::Error> {
        let pool = self.geo_pool(&data_set.connection).await?;
        let (schema, table) = data_set.schema_and_table();
        let qualified = format!("{}.{}", quote_ident(&schema), quote_ident(&table));

        let primary_key: Option<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_index i
                JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = $1::regclass AND i.indisprimary
            LIMIT 1
            "#,
        )
        .bind(&qualified)
        .fetch_optional(&pool)
        .await?;

        let geometry: Option<(String, i32, String)> = sqlx::query_as(
            r#"
            SELECT f_geometry_column::text, srid, type::text
            FROM geometry_columns
            WHERE f_table_schema = $1 AND f_table_name = $2
                AND ($3::text IS NULL OR f_geometry_column = $3)
            LIMIT 1
            "#,
        )
        .bind(&schema)
        .bind(&table)
        .bind(data_set.geometry_column.as_deref())
        .fetch_optional(&pool)
        .await?;

        let column_types: BTreeMap<String, String> = sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT column_name::text, data_type::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&schema)
        .bind(&table)
        .fetch_all(&pool)
        .await?
        .into_iter()
        .collect();

        let mut extent = None;
        if let Some((column, _, _)) = &geometry {
            let sql = format!(
                "SELECT ST_XMin(e), ST_YMin(e), ST_XMax(e), ST_YMax(e) FROM (SELECT ST_Extent({}) AS e FROM {}) x",
                quote_ident(column),
                qualified
            );
            let row: (Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
                sqlx::query_as(&sql).fetch_one(&pool).await?;
            if let (Some(xmin), Some(ymin), Some(xmax), Some(ymax)) = row {
                extent = Some([xmin, ymin, xmax, ymax]);
            }
        }

        Ok(TableMetadata {
            primary_key,
            geometry: geometry.map(|(column, srid, geometry_type)| GeometryInfo {
                column,
                geometry_type,
                srid,
            }),
            column_types,
            extent,
        })
    }
}

#[async_trait]
impl ConfigStore for PgConfigStore {
    async fn ows_services(&self, ows_type: OwsType) -> Result<OwsServices, StoreError> {
        let sql = format!(
            "SELECT gdi_oid, name, description, ows_metadata, gdi_oid_root_layer FROM {} WHERE ows_type = $1 ORDER BY name",
            gdi("wms_wfs")
        );
        let rows = sqlx::query_as::<_, (i64, String, Option<String>, Option<String>, Option<i64>)>(&sql)
            .bind(ows_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut result = OwsServices::default();
        if rows.is_empty() {
            return Ok(result);
        }

        let index = self.layer_index().await?;
        for (gdi_oid, name, description, ows_metadata, root) in rows {
            let root_layer = match root {
                Some(root) => index.build(root),
                None => Err(StoreError::MissingData("no root layer".into())),
            };
            match root_layer {
                Ok(root_layer) => result.services.push(OwsService {
                    gdi_oid,
                    ows_type,
                    root_layer,
                    name,
                    description,
                    ows_metadata,
                }),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(service = %name, error = %e, "skipping {} service", ows_type.as_str());
                    result.broken.push(BrokenService {
                        ows_type,
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    async fn print_templates(&self) -> Result<Vec<PrintTemplate>, StoreError> {
        let sql = format!(
            "SELECT t.gdi_oid, t.name, q.qgs_print_layout FROM {} t JOIN {} q ON q.gdi_oid = t.gdi_oid ORDER BY t.name",
            gdi("template"),
            gdi("template_qgis")
        );
        let rows = sqlx::query_as::<_, (i64, String, Option<String>)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(gdi_oid, name, print_layout)| PrintTemplate {
                gdi_oid,
                name,
                print_layout,
            })
            .collect())
    }

    async fn document_templates(&self) -> Result<Vec<DocumentTemplate>, StoreError> {
        let sql = format!(
            "SELECT t.gdi_oid, t.name, j.report_filename FROM {} t JOIN {} j ON j.gdi_oid = t.gdi_oid ORDER BY t.name",
            gdi("template"),
            gdi("template_jasper")
        );
        let rows = sqlx::query_as::<_, (i64, String, Option<String>)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        let mut templates = Vec::with_capacity(rows.len());
        for (gdi_oid, name, report_filename) in rows {
            let report_filename = report_filename.ok_or_else(|| {
                StoreError::MissingData(format!("document template '{}' has no report file", name))
            })?;
            templates.push(DocumentTemplate {
                gdi_oid,
                name,
                report_filename,
            });
        }
        Ok(templates)
    }

    async fn default_info_template(&self) -> Result<Option<String>, StoreError> {
        let sql = format!(
            "SELECT i.info_template FROM {} t JOIN {} i ON i.gdi_oid = t.gdi_oid WHERE t.name = 'default' LIMIT 1",
            gdi("template"),
            gdi("template_info")
        );
        let template: Option<Option<String>> = sqlx::query_scalar(&sql).fetch_optional(&self.pool).await?;
        Ok(template.flatten())
    }

    async fn background_layers(&self) -> Result<Vec<BackgroundLayer>, StoreError> {
        let sql = format!(
            "SELECT gdi_oid, name, qgis_datasource FROM {} ORDER BY name",
            gdi("background_layer")
        );
        let rows = sqlx::query_as::<_, (i64, String, Option<String>)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(gdi_oid, name, qgis_datasource)| BackgroundLayer {
                gdi_oid,
                name,
                qgis_datasource: qgis_datasource.unwrap_or_default(),
            })
            .collect())
    }

    async fn edit_datasets(&self) -> Result<Vec<EditDataset>, StoreError> {
        let sql = format!(
            r#"
            SELECT e.gdi_oid, e.name, v.searchable::int4 AS searchable, v.facet, v.filter_word,
                v.gdi_oid AS view_oid, v.geometry_column,
                s.gdi_oid AS data_set_oid, s.data_set_name, s.primary_key,
                src.gdi_oid AS data_source_oid, src.connection_type::text AS connection_type, src.connection
            FROM {edit} e
                LEFT JOIN {view} v ON v.gdi_oid = e.gdi_oid_data_set_view
                LEFT JOIN {set} s ON s.gdi_oid = v.gdi_oid_data_set
                LEFT JOIN {source} src ON src.gdi_oid = s.gdi_oid_data_source
            ORDER BY e.name
            "#,
            edit = gdi("data_set_edit"),
            view = gdi("data_set_view"),
            set = gdi("data_set"),
            source = gdi("data_source"),
        );
        let rows = sqlx::query_as::<_, EditRow>(&sql).fetch_all(&self.pool).await?;
        let attributes = self.attribute_rows().await?;
        let index = LayerIndex::new(Vec::new(), Vec::new(), attributes);

        let mut datasets = Vec::with_capacity(rows.len());
        for row in rows {
            let data_set = match row.data_set.resolve(&format!("dataset '{}'", row.name)) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(dataset = %row.name, error = %e, "skipping edit dataset");
                    continue;
                }
            };
            datasets.push(EditDataset {
                gdi_oid: row.gdi_oid,
                name: row.name,
                attributes: index.attributes_of_view(data_set.view_oid),
                data_set,
                searchable: row.searchable.unwrap_or(0),
                facet: row.facet,
                filter_word: row.filter_word,
            });
        }
        Ok(datasets)
    }

    async fn principals(&self) -> Result<Principals, StoreError> {
        let roles: Vec<String> = sqlx::query_scalar(&format!("SELECT name FROM {} ORDER BY name", iam("role")))
            .fetch_all(&self.pool)
            .await?;
        let group_names: Vec<String> =
            sqlx::query_scalar(&format!("SELECT name FROM {} ORDER BY name", iam("group")))
                .fetch_all(&self.pool)
                .await?;
        let user_names: Vec<String> = sqlx::query_scalar(&format!("SELECT name FROM {} ORDER BY name", iam("user")))
            .fetch_all(&self.pool)
            .await?;

        let pairs = |sql: String| async move {
            sqlx::query_as::<_, (String, String)>(&sql)
                .fetch_all(&self.pool)
                .await
                .map(|rows| {
                    rows.into_iter().fold(HashMap::new(), |mut m: HashMap<String, Vec<String>>, (k, v)| {
                        m.entry(k).or_default().push(v);
                        m
                    })
                })
        };
        let group_roles = pairs(format!(
            "SELECT g.name, r.name FROM {} gr JOIN {} g ON g.gdi_oid = gr.gdi_oid_group JOIN {} r ON r.gdi_oid = gr.gdi_oid_role ORDER BY g.name, r.name",
            iam("group_role"),
            iam("group"),
            iam("role")
        ))
        .await?;
        let user_groups = pairs(format!(
            "SELECT u.name, g.name FROM {} gu JOIN {} u ON u.gdi_oid = gu.gdi_oid_user JOIN {} g ON g.gdi_oid = gu.gdi_oid_group ORDER BY u.name, g.name",
            iam("group_user"),
            iam("user"),
            iam("group")
        ))
        .await?;
        let user_roles = pairs(format!(
            "SELECT u.name, r.name FROM {} ur JOIN {} u ON u.gdi_oid = ur.gdi_oid_user JOIN {} r ON r.gdi_oid = ur.gdi_oid_role ORDER BY u.name, r.name",
            iam("user_role"),
            iam("user"),
            iam("role")
        ))
        .await?;

        Ok(Principals {
            users: user_names
                .into_iter()
                .map(|name| UserRecord {
                    groups: user_groups.get(&name).cloned().unwrap_or_default(),
                    roles: user_roles.get(&name).cloned().unwrap_or_default(),
                    name,
                })
                .collect(),
            groups: group_names
                .into_iter()
                .map(|name| GroupRecord {
                    roles: group_roles.get(&name).cloned().unwrap_or_default(),
                    name,
                })
                .collect(),
            roles,
        })
    }

    async fn resource_permissions(&self) -> Result<Vec<PermissionRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT r.name, p.gdi_oid_resource, res.table_name, res.name,
                COALESCE(p.read, TRUE), COALESCE(p.write, FALSE), COALESCE(p.priority, 0)::int4 AS priority
            FROM {permission} p
                JOIN {role} r ON r.gdi_oid = p.gdi_oid_role
                JOIN {resource} res ON res.gdi_oid = p.gdi_oid_resource
            ORDER BY r.name, priority DESC, p.gdi_oid_resource
            "#,
            permission = iam("resource_permission"),
            role = iam("role"),
            resource = gdi("gdi_resource"),
        );
        let rows = sqlx::query_as::<_, (String, i64, String, String, bool, bool, i32)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(role, resource_id, table_name, resource_name, read, write, priority)| PermissionRow {
                role,
                resource_id,
                table_name,
                resource_name,
                read,
                write,
                priority,
            })
            .collect())
    }

    async fn table_metadata(&self, data_set: &DataSetRef) -> Result<Option<TableMetadata>, StoreError> {
        if data_set.connection_type != ConnectionType::Database {
            return Ok(None);
        }
        match self.inspect_table(data_set).await {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                // GeoDB problems affect single layers only, never the ConfigDB run.
                tracing::warn!(data_set = %data_set.data_set_name, error = %e, "could not inspect table");
                Ok(None)
            }
        }
    }

    async fn close(&self) {
        for (_, pool) in self.geo_pools.lock().await.drain() {
            pool.close().await;
        }
        self.pool.close().await;
    }
}

/// Opens a [`PgConfigStore`] on `config.config_db_url` for each run.
#[derive(Clone, Copy, Debug, Default)]
pub struct PgConnector;

#[async_trait]
impl StoreConnector for PgConnector {
    async fn connect(&self, config: &GeneratorConfig) -> Result<Box<dyn ConfigStore>, StoreError> {
        let store = PgConfigStore::connect(&config.config.config_db_url).await?;
        Ok(Box::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(iam("group_role"), "iam.\"group_role\"");
        assert_eq!(gdi("wms_wfs"), "gdi_knoten.wms_wfs");
    }
}
