use crate::scenario::{Scenario, Step, ViewKind, ViewSpec};
use anyhow::{anyhow, bail, Context as _, Result};
use firebind_core::{
    delete_field, AggregateState, CellWatch, Collection, CollectionOptions, CollectionState,
    Context, Document, DocumentOptions, DocumentState, FirebindConfig, MemoryBackend, Mode,
    QuerySpec, SetOptions,
};
use firebind_geo::{GeoQuery, GeoQueryOptions, GeoRegion};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// String value standing for "delete this field" in scenario writes
const DELETE_MARKER: &str = "$delete";

enum Handle {
    Document(Document, CellWatch<DocumentState>),
    Collection(Collection, CellWatch<CollectionState<Document>>),
    Geo(GeoQuery, CellWatch<AggregateState<Document>>),
}

/// An open view; holding the watch keeps it listening
struct View {
    name: String,
    handle: Handle,
}

impl View {
    fn open(ctx: &Context, spec: &ViewSpec) -> Result<Self> {
        let handle = match spec.kind()? {
            ViewKind::Document(path) => {
                let mut options = DocumentOptions::default().with_debug_name(&spec.name);
                options.mode = spec.mode;
                let doc = Document::with_context(ctx.clone(), path, options)
                    .with_context(|| format!("Failed to open document view `{}`", spec.name))?;
                let watch = doc.observe();
                Handle::Document(doc, watch)
            }
            ViewKind::Collection(path, query) => {
                let mut options = CollectionOptions::default().with_debug_name(&spec.name);
                options.mode = spec.mode;
                options.minimize_updates = spec.minimize_updates;
                if let Some(query) = query.cloned() {
                    options.query = QuerySpec::build(move |collection| Some(query.build(collection)));
                }
                let col = Collection::with_context(ctx.clone(), path, options)
                    .with_context(|| format!("Failed to open collection view `{}`", spec.name))?;
                let watch = col.observe();
                Handle::Collection(col, watch)
            }
            ViewKind::Geo(geo) => {
                let mut collection = CollectionOptions::default().with_debug_name(&spec.name);
                collection.mode = spec.mode;
                let options = GeoQueryOptions::default()
                    .with_field(&geo.field)
                    .with_collection(collection);
                let query =
                    GeoQuery::new(ctx.clone(), geo.collection.as_str(), geo.region, options)
                        .with_context(|| format!("Failed to open geo view `{}`", spec.name))?;
                let watch = query.observe();
                Handle::Geo(query, watch)
            }
        };
        Ok(Self {
            name: spec.name.clone(),
            handle,
        })
    }

    fn render(&self) -> Value {
        match &self.handle {
            Handle::Document(doc, _) => json!({
                "path": doc.path(),
                "exists": doc.has_data(),
                "loaded": doc.is_loaded(),
                "data": Value::Object((*doc.data()).clone()),
            }),
            Handle::Collection(col, _) => json!({
                "loaded": col.is_loaded(),
                "docs": render_docs(&col.docs()),
            }),
            Handle::Geo(query, _) => json!({
                "loaded": query.is_loaded(),
                "ranges": query
                    .geohash_ranges()
                    .into_iter()
                    .map(|range| range.start)
                    .collect::<Vec<_>>(),
                "docs": render_docs(&query.docs()),
            }),
        }
    }

    fn set_region(&self, region: Option<GeoRegion>) -> Result<()> {
        match &self.handle {
            Handle::Geo(query, _) => {
                query.set_region(region);
                Ok(())
            }
            _ => bail!("view `{}` is not a geo view", self.name),
        }
    }
}

fn render_docs(docs: &[Document]) -> Value {
    docs.iter()
        .map(|doc| {
            json!({
                "id": doc.id(),
                "data": Value::Object((*doc.data()).clone()),
            })
        })
        .collect()
}

/// Replace scenario delete markers with the backend's sentinel
fn with_sentinels(value: Value) -> Value {
    match value {
        Value::String(s) if s == DELETE_MARKER => delete_field(),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, with_sentinels(value)))
                .collect(),
        ),
        other => other,
    }
}

fn load_config(path: &Path) -> Result<FirebindConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no configuration file, using defaults");
        return Ok(FirebindConfig::default());
    }
    FirebindConfig::from_file(path).context("Failed to load configuration")
}

fn find<'a>(views: &'a [View], name: &str) -> Result<&'a View> {
    views
        .iter()
        .find(|view| view.name == name)
        .ok_or_else(|| anyhow!("Unknown view `{}`", name))
}

/// Writes go through handles that never listen
fn writer(ctx: &Context, path: &str) -> Result<Document> {
    Ok(Document::with_context(
        ctx.clone(),
        path,
        DocumentOptions::default().with_mode(Mode::Off),
    )?)
}

pub async fn replay(config_path: &Path, scenario_path: &Path, pretty: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let content = fs::read_to_string(scenario_path)
        .with_context(|| format!("Failed to read scenario {}", scenario_path.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&content).context("Failed to parse scenario")?;

    let backend = MemoryBackend::new();
    for (path, data) in scenario.seed {
        backend
            .insert(&path, data)
            .with_context(|| format!("Failed to seed {}", path))?;
    }
    let ctx = Context::new(backend).with_config(config);

    let views = scenario
        .views
        .iter()
        .map(|spec| View::open(&ctx, spec))
        .collect::<Result<Vec<_>>>()?;
    info!(
        views = views.len(),
        steps = scenario.steps.len(),
        "replaying scenario"
    );

    for (index, step) in scenario.steps.into_iter().enumerate() {
        debug!(step = index, ?step, "applying step");
        match step {
            Step::Set { path, data, merge } => {
                writer(&ctx, &path)?
                    .set(with_sentinels(data), SetOptions { merge })
                    .await
                    .with_context(|| format!("step {}: set {}", index, path))?;
            }
            Step::Update { path, fields } => {
                writer(&ctx, &path)?
                    .update(with_sentinels(fields))
                    .await
                    .with_context(|| format!("step {}: update {}", index, path))?;
            }
            Step::Add { collection, data } => {
                let col = Collection::with_context(
                    ctx.clone(),
                    collection.as_str(),
                    CollectionOptions::default().with_mode(Mode::Off),
                )?;
                let created = col
                    .add(with_sentinels(data))
                    .await
                    .with_context(|| format!("step {}: add to {}", index, collection))?;
                debug!(path = ?created.path(), "added document");
            }
            Step::Delete { path } => {
                writer(&ctx, &path)?
                    .delete()
                    .await
                    .with_context(|| format!("step {}: delete {}", index, path))?;
            }
            Step::WaitMs(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::Print(name) => {
                let view = find(&views, &name)?;
                let line = json!({ "step": index, "view": name, "value": view.render() });
                println!("{}", serde_json::to_string(&line)?);
            }
            Step::Region { view, region } => find(&views, &view)?.set_region(region)?,
        }
    }

    let finals: Map<String, Value> = views
        .iter()
        .map(|view| (view.name.clone(), view.render()))
        .collect();
    let output = Value::Object(finals);
    let payload = if pretty {
        serde_json::to_string_pretty(&output)?
    } else {
        serde_json::to_string(&output)?
    };
    println!("{}", payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_markers_are_replaced() {
        let value = with_sentinels(json!({"a": "$delete", "b": {"c": "$delete", "d": 1}}));
        assert_eq!(value["a"], delete_field());
        assert_eq!(value["b"]["c"], delete_field());
        assert_eq!(value["b"]["d"], json!(1));
    }
}
