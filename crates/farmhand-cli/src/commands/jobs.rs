//! Job tracking commands: status, wait, kill, list and logs.

use anyhow::Result;
use console::style;

use farmhand_sched::backend::{AUX_STDERR, AUX_STDOUT, AUX_USER_LOG};

use super::common::{Session, print_job, report_outcome, styled_state, wait_policy};

/// Execute the status command.
pub async fn status(session: &Session, id: &str) -> Result<()> {
    let info = session.backend.get_status(&session.handle(id)).await?;

    println!(
        "{} Job {} status: {} ({})",
        style("→").cyan().bold(),
        style(id).dim(),
        styled_state(info.state).bold(),
        info.native_state
    );
    if let Some(name) = &info.name {
        println!("  Name: {name}");
    }
    if let Some(queue) = &info.queue {
        println!("  Queue: {}", style(queue).yellow());
    }
    if !info.exec_hosts.is_empty() {
        println!("  Hosts: {}", info.exec_hosts.join(", "));
    }
    if info.state.is_terminal() {
        println!("  Terminal: {}", style("yes").dim());
    }
    Ok(())
}

/// Execute the wait command.
pub async fn wait(
    session: &Session,
    id: &str,
    attempts: Option<u32>,
    interval: u64,
    log: Option<&str>,
) -> Result<()> {
    let mut handle = session.handle(id);
    if let Some(log) = log {
        handle = handle.with_aux(AUX_USER_LOG, log);
    }
    let outcome = session
        .backend
        .wait(&handle, &wait_policy(attempts, interval))
        .await?;
    report_outcome(&handle, outcome)
}

/// Execute the kill command.
pub async fn kill(session: &Session, id: &str) -> Result<()> {
    session.backend.kill(&session.handle(id)).await?;
    println!(
        "{} Removal of {} requested; poll its status to confirm",
        style("✓").green().bold(),
        style(id).dim()
    );
    Ok(())
}

/// Execute the list command.
pub async fn list(session: &Session) -> Result<()> {
    let jobs = session.backend.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("{} {} job(s):\n", style("→").cyan().bold(), jobs.len());
    println!(
        "  {:<20}  {:<24}  {:<10}  {:<10}  {:<12}  {}",
        style("ID").bold(),
        style("NAME").bold(),
        style("STATE").bold(),
        style("NATIVE").bold(),
        style("QUEUE").bold(),
        style("SUBMITTED").bold()
    );
    println!("  {}", "-".repeat(96));
    for job in &jobs {
        print_job(job);
    }
    Ok(())
}

/// Execute the logs command.
pub async fn logs(
    session: &Session,
    id: &str,
    stdout_path: Option<&str>,
    stderr_path: Option<&str>,
) -> Result<()> {
    let mut handle = session.handle(id);
    if let Some(path) = stdout_path {
        handle = handle.with_aux(AUX_STDOUT, path);
    }
    if let Some(path) = stderr_path {
        handle = handle.with_aux(AUX_STDERR, path);
    }
    let logs = session.backend.fetch_logs(&handle).await?;

    println!("{}", style("--- stdout ---").bold());
    print!("{}", logs.stdout);
    println!("{}", style("--- stderr ---").bold());
    print!("{}", logs.stderr);
    Ok(())
}
