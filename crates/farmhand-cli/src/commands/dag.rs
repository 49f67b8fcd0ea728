//! Pipeline (dag) command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;

use farmhand_sched::{DispatchTarget, MonitoringClient, PipelineManifest, dispatch_sequentially};

use super::common::{Session, WaitArgs, load_config, print_handles, register_task, wait_all};

/// Type label under which pipelines are registered for monitoring.
const PIPELINE_TYPE: &str = "pipeline";

/// Options of `farmhand dag`.
#[derive(Debug, Clone, Default)]
pub struct DagOptions {
    pub label: Option<String>,
    pub tag: Option<String>,
    pub sequential: bool,
}

/// Execute the dag command.
pub async fn execute(
    config_path: Option<&Path>,
    backend: Option<&str>,
    manifest_path: &Path,
    options: &DagOptions,
    wait: &WaitArgs,
) -> Result<()> {
    let manifest = PipelineManifest::from_file(manifest_path)
        .with_context(|| format!("Failed to load manifest: {}", manifest_path.display()))?;
    let graph = manifest.build_graph(options.label.as_deref())?;
    println!(
        "{} Pipeline {} with {} job(s)",
        style("→").cyan().bold(),
        style(graph.label()).bold(),
        graph.len()
    );

    let mut config = load_config(config_path, backend)?;
    if let Some(tag) = &options.tag {
        config.htcondor.submission_tag = Some(tag.clone());
        config.lsf.submission_tag = Some(tag.clone());
    }
    let monitoring = MonitoringClient::connect(config.monitoring.clone(), None).await;
    let session = Session::with_config(config)?;
    let backend = session.backend.as_ref();

    let handles = if options.sequential {
        // Dependents are dispatched only after their parents finish, so the
        // task is registered up front.
        if let Some(client) = &monitoring {
            register_task(client, PIPELINE_TYPE, &graph, &[]).await?;
        }
        dispatch_sequentially(backend, &graph, &wait.policy()).await?
    } else {
        let handles = backend.dispatch(DispatchTarget::Graph(&graph)).await?;
        if let Some(client) = &monitoring {
            register_task(client, PIPELINE_TYPE, &graph, &handles).await?;
        }
        handles
    };
    print_handles(backend.backend_type(), &handles);

    if wait.wait && !options.sequential {
        wait_all(backend, &handles, &wait.policy()).await?;
    }
    Ok(())
}
