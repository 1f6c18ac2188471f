use std::env;

use scenegraph_core::backup::{self, BackupLog};
use scenegraph_core::server::serve_stdio;
use scenegraph_core::{
    lock_read, lock_write, ContentHasher, DotConfig, DotGraphGenerator, GraphExporter, JsonDeserializer,
    JsonSerializer, NamespaceFilter, NullTransport, QueryRunner, SceneGraph, SceneObserver,
    WorldModelConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let config = WorldModelConfig::from_env()?;
    let scene = SceneGraph::from_config(&config).shared();

    // Restore from the backup log before logging new updates into it.
    if let Some(path) = config.backup_path.as_ref().filter(|p| p.exists()) {
        backup::replay(path, &mut JsonDeserializer::for_scene(scene.clone()))?;
    }

    if args.iter().any(|a| a == "--dot") {
        let graph = lock_read(&scene)?;
        print!("{}", DotGraphGenerator::new(DotConfig::default()).generate(graph.store())?);
        return Ok(());
    }
    if args.iter().any(|a| a == "--export") {
        let graph = lock_read(&scene)?;
        println!("{}", serde_json::to_string(&GraphExporter::export(graph.store())?)?);
        return Ok(());
    }

    if let Some(path) = &config.backup_path {
        let serializer = JsonSerializer::new(NullTransport).with_backup(BackupLog::open(path)?);
        let sink: Box<dyn SceneObserver> = match &config.filter_namespace {
            Some(namespace) => {
                let mut filter = NamespaceFilter::new(namespace.as_str());
                filter.attach(Box::new(serializer));
                Box::new(filter)
            }
            None => Box::new(serializer),
        };
        lock_write(&scene)?.attach(sink);
    }

    {
        let graph = lock_read(&scene)?;
        info!(
            root = %graph.root_id(),
            nodes = graph.store().len(),
            hash = %ContentHasher::hash_store(graph.store())?,
            "scenegraph serving on stdio"
        );
    }

    let mut runner = QueryRunner::new(scene);
    serve_stdio(&mut runner).await?;
    Ok(())
}
