//! QGIS Server projects for the ConfigDB's WMS and WFS services.

pub mod layers;
pub mod style;
pub mod template;
pub mod writer;

pub use layers::{LayerCollector, MapLayer, TreeItem};
pub use style::{check_well_formed, parse_qml, DefaultStyles, QmlStyle};
pub use template::Template;
pub use writer::{render_project, Project, WfsProperties, WmsProperties};

use crate::config::QgsWriterConfig;
use crate::error::GenerateError;
use crate::report::StageLog;
use crate::store::{ConfigStore, OwsType, ResourceId};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Write `<name>.qgs` and `<name>_print.qgs` per WMS and `<name>_wfs.qgs` per WFS.
/// A WFS project is named after the WMS at the same position in name order, or after
/// the WFS itself when there are more WFS than WMS services. Broken services and
/// projects that fail to render are logged and skipped. Returns the written paths.
pub async fn write_projects(
    store: &dyn ConfigStore,
    config: &QgsWriterConfig,
    log: &mut StageLog,
) -> Result<Vec<PathBuf>, GenerateError> {
    let template_dir = config.template_dir.as_deref();
    let template = writer::load_template(template_dir).await?;
    let styles = DefaultStyles::load(template_dir).await?;

    let wms = store.ows_services(OwsType::Wms).await?;
    let wfs = store.ows_services(OwsType::Wfs).await?;
    for broken in wms.broken.iter().chain(&wfs.broken) {
        log.error(format!(
            "Skipping {} service '{}': {}",
            broken.ows_type.as_str(),
            broken.name,
            broken.reason
        ));
    }
    let (wms_services, wfs_services) = (wms.services, wfs.services);
    if wms_services.is_empty() && wfs_services.is_empty() {
        log.warning("No WMS or WFS service in the ConfigDB, no QGIS projects written");
        return Ok(Vec::new());
    }

    let print_templates = store.print_templates().await?;
    let mut layouts = Vec::new();
    for template in &print_templates {
        let Some(layout) = template.print_layout.as_deref() else { continue };
        match check_well_formed(layout) {
            Ok(()) => layouts.push(layout),
            Err(e) => log.warning(format!("Skipping print layout '{}': {}", template.name, e)),
        }
    }
    let background_layers = store.background_layers().await?;
    let writable: HashSet<ResourceId> = store
        .resource_permissions()
        .await?
        .into_iter()
        .filter(|p| p.write && p.table_name == "ows_layer")
        .map(|p| p.resource_id)
        .collect();

    let roots: Vec<_> = wms_services.iter().chain(&wfs_services).map(|s| &s.root_layer).collect();
    let metadata = layers::fetch_metadata(store, &roots).await?;
    let collector = LayerCollector {
        config,
        styles: &styles,
        metadata: &metadata,
    };

    let dir = &config.project_output_dir;
    let mut written = Vec::new();
    for wms in &wms_services {
        let items = collector.collect(&wms.root_layer, true, log);
        let mut properties = WmsProperties::from_metadata(wms.ows_metadata.as_deref(), log);
        properties.root_name = wms.root_layer.name.clone();
        properties.url = config.wms_service_url.clone();
        let mut project = Project {
            title: project_title(&properties, &wms.name),
            items,
            layouts: Vec::new(),
            extent: config.default_extent,
            wms: Some(properties),
            wfs: None,
            selection_color: config.selection_color,
        };
        let filename = format!("{}.qgs", wms.name);
        if let Some(path) = render_and_write(&template, &project, dir, &filename, log).await? {
            written.push(path);
        }

        if let Some(background) = collector.background_group(&background_layers, log) {
            project.items.push(background);
        }
        project.layouts = layouts.clone();
        let filename = format!("{}_print.qgs", wms.name);
        if let Some(path) = render_and_write(&template, &project, dir, &filename, log).await? {
            written.push(path);
        }
    }

    for (position, wfs) in wfs_services.iter().enumerate() {
        let items = collector.collect(&wfs.root_layer, false, log);
        let vector: Vec<&MapLayer> = writer::vector_layers(&items).collect();
        let properties = WfsProperties {
            layers: vector.iter().map(|l| l.id.clone()).collect(),
            writable: vector
                .iter()
                .filter(|l| writable.contains(&l.gdi_oid))
                .map(|l| l.id.clone())
                .collect(),
            url: config.wfs_service_url.clone(),
        };
        let meta = WmsProperties::from_metadata(wfs.ows_metadata.as_deref(), log);
        let project = Project {
            title: project_title(&meta, &wfs.name),
            items,
            layouts: Vec::new(),
            extent: config.default_extent,
            wms: None,
            wfs: Some(properties),
            selection_color: config.selection_color,
        };
        let base = wms_services.get(position).map_or(&wfs.name, |wms| &wms.name);
        let filename = format!("{}_wfs.qgs", base);
        if let Some(path) = render_and_write(&template, &project, dir, &filename, log).await? {
            written.push(path);
        }
    }
    Ok(written)
}

/// Render errors skip the project; write errors fail the stage.
async fn render_and_write(
    template: &Template,
    project: &Project<'_>,
    dir: &Path,
    filename: &str,
    log: &mut StageLog,
) -> Result<Option<PathBuf>, GenerateError> {
    match render_project(template, project) {
        Ok(qgs) => Ok(Some(writer::write_project(dir, filename, &qgs, log).await?)),
        Err(e) => {
            log.error(format!("Skipping QGIS project '{}': {}", filename, e));
            Ok(None)
        }
    }
}

fn project_title(properties: &WmsProperties, service_name: &str) -> String {
    if properties.service_title.is_empty() {
        service_name.to_string()
    } else {
        properties.service_title.clone()
    }
}
