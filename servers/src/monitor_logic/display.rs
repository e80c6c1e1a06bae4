use colored::*;
use lib_sentinel::model::{AlertLevel, ConnectionStatus, Snapshot};

/// One line per flush: time, alert level, intruders, power, source and link state.
pub fn summary_line(snapshot: &Snapshot) -> String {
    let level = format!("{:?}", snapshot.alerts.alert_level);
    let level = match snapshot.alerts.alert_level {
        AlertLevel::Critical => level.bright_white().on_bright_red(),
        AlertLevel::High => level.bright_red(),
        AlertLevel::Elevated => level.bright_yellow(),
        AlertLevel::Normal => level.bright_green(),
    };

    let meta = &snapshot.metadata;
    let link = format!("{:?}/{:?}", meta.data_source, meta.connection_status).to_lowercase();
    let link = match meta.connection_status {
        ConnectionStatus::Connected => link.bright_cyan(),
        ConnectionStatus::Connecting => link.yellow(),
        ConnectionStatus::Disconnected => link.truecolor(128, 128, 128),
    };

    let mut line = format!(
        "{} {:<8} intruders={} power={:?} {}",
        snapshot.system_status.last_update.truecolor(128, 128, 128),
        level,
        snapshot.intruders.len(),
        snapshot.system_status.power_mode,
        link,
    );
    if let Some(errors) = meta.error_count.filter(|n| *n > 0) {
        line.push_str(&format!(" errors={}", errors).red().to_string());
    }
    if let Some(alert) = snapshot.alerts.recent_alerts.last() {
        line.push_str(&format!(" last=\"{}\"", alert.message));
    }
    line
}
