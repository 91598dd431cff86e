use std::sync::Arc;

use anyhow::Result;
use threadline_core::{
    ConversationClient, FetchIntent, MemoryPanel, PanelNode, SyncConfig, SyncController,
    ThreadlinePaths,
};

use crate::ui;

pub async fn run(all: bool, limit: Option<usize>) -> Result<()> {
    let paths = ThreadlinePaths::from_env();
    let credentials = Arc::new(super::credentials(&paths)?);

    let mut config = SyncConfig::load(&paths.config_path)?;
    if let Some(limit) = limit {
        config.default_limit = limit;
        config.validate()?;
    }

    if credentials.current().is_none() {
        ui::error("No credential stored yet.");
        ui::info("Store one with: threadline token set \"Bearer <token>\"");
        return Ok(());
    }

    let link_marker = config.link_marker.clone();
    let client = ConversationClient::new(&config.list_endpoint)?;
    let panel = MemoryPanel::new();
    let mut controller = SyncController::new(config, client, credentials, panel.clone());
    controller.install_styles();

    let intent = if all {
        FetchIntent::FetchAll
    } else {
        FetchIntent::Initial
    };
    let plan = controller.strategy().plan_for(intent, None);

    let spinner = ui::spinner("Fetching conversations");
    let records = controller.fetch(&plan).await;
    spinner.finish_and_clear();

    if records.is_empty() {
        ui::error("No conversations fetched.");
        ui::dim("Check the stored credential and endpoint; RUST_LOG=debug shows why.");
        return Ok(());
    }

    // Lay the list out the way the remote returned it, then group it.
    for record in &records {
        let href = format!("{}{}", link_marker, record.id);
        panel.push_link(&href, record.title().unwrap_or(&record.id));
    }
    controller.merge_records(records);
    let report = controller.reconcile_now();

    for node in panel.nodes() {
        match node {
            PanelNode::Separator { label, .. } => ui::heading(&label),
            PanelNode::Link { label, .. } => ui::info(&label),
        }
    }

    if let Some(report) = report {
        println!();
        ui::success(&format!(
            "{} conversations in {} groups",
            report.bound,
            report.separators.len()
        ));
    }
    Ok(())
}
