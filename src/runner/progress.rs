//! Classifies raw engine output lines into operator-facing progress events
//!
//! Only stdout is classified; suppressed classes (`ok:`, `skipping:`,
//! unmatched lines) produce no event.

const TASK_NAME_LIMIT: usize = 60;
const DETAIL_LIMIT: usize = 80;

/// Fixed table mapping canonical engine task names to operator-friendly
/// descriptions. Lookup is exact-match first, then substring, then identity.
const TASK_DESCRIPTIONS: &[(&str, &str)] = &[
    ("Gathering Facts", "Collecting server information"),
    ("Wait for system to become reachable", "Waiting for server connection"),
    ("Update apt cache", "Updating package list"),
    ("Install required packages", "Installing system packages"),
    ("Install Node.js", "Installing Node.js"),
    ("Install NVM", "Installing Node Version Manager"),
    ("Install PM2 globally", "Installing PM2 process manager"),
    ("Create deployment user", "Creating deployment user"),
    ("Setup Nginx", "Configuring web server"),
    ("Install Nginx", "Installing Nginx web server"),
    ("Configure Nginx", "Configuring web server"),
    ("Install UFW", "Installing firewall"),
    ("Configure UFW", "Configuring firewall"),
    ("Install Fail2ban", "Installing Fail2ban security"),
    ("Configure Fail2ban", "Configuring Fail2ban"),
    ("Clone repository", "Downloading application code"),
    ("Install dependencies", "Installing application dependencies"),
    ("Build application", "Building application"),
    ("Start application", "Starting application with PM2"),
    ("Restart Nginx", "Restarting web server"),
    ("Enable and start services", "Starting system services"),
];

fn describe_task(name: &str) -> String {
    for (task, description) in TASK_DESCRIPTIONS {
        if *task == name {
            return (*description).to_string();
        }
    }
    for (task, description) in TASK_DESCRIPTIONS {
        if name.contains(task) {
            return (*description).to_string();
        }
    }
    name.to_string()
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit - 3).collect();
    format!("{cut}...")
}

fn bracketed_name(rest: &str) -> &str {
    rest.split(']').next().unwrap_or(rest).trim()
}

/// Classify one trimmed engine output line. Returns the event to emit, or
/// `None` when the line is noise.
pub fn parse_line(raw: &str) -> Option<String> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("PLAY [") {
        return Some(format!("Starting: {}", bracketed_name(rest)));
    }

    if let Some(rest) = line.strip_prefix("TASK [") {
        return Some(truncate(&describe_task(bracketed_name(rest)), TASK_NAME_LIMIT));
    }

    if line.starts_with("ok:") || line.starts_with("skipping:") {
        return None;
    }

    if line.starts_with("changed:") {
        let host = line
            .split_whitespace()
            .nth(1)
            .map(|field| field.trim_matches(|c| c == '[' || c == ']'));
        return Some(match host {
            Some(host) if !host.is_empty() => format!("Modified on {host}"),
            _ => "Configuration updated".to_string(),
        });
    }

    if line.starts_with("failed:") || line.starts_with("fatal:") {
        return Some(match line.split_once("=>") {
            Some((_, detail)) => format!("Error: {}", truncate(detail.trim(), DETAIL_LIMIT)),
            None => "Task failed".to_string(),
        });
    }

    if line.contains("UNREACHABLE") {
        return Some("Target unreachable - check SSH connection".to_string());
    }

    if line.starts_with("PLAY RECAP") {
        return Some("Summary of execution".to_string());
    }

    if line.contains("WARNING") && !line.contains("Skipping") {
        if line.contains("as it is not a mapping") || line.contains("as this is not a valid group")
        {
            return None;
        }
        let message = line.trim_start_matches("[WARNING]:").trim();
        return Some(format!("Warning: {}", truncate(message, DETAIL_LIMIT)));
    }

    if line.contains("ERROR") {
        let message = line.trim_start_matches("[ERROR]:").trim();
        return Some(format!("Error: {}", truncate(message, DETAIL_LIMIT)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_lines() {
        assert_eq!(
            parse_line("PLAY [Provision web servers] ****"),
            Some("Starting: Provision web servers".to_string())
        );
    }

    #[test]
    fn test_task_lines_are_localised() {
        let event = parse_line("TASK [Gathering Facts] *********").unwrap();
        assert!(event.starts_with("Collecting server information"));
    }

    #[test]
    fn test_task_substring_match() {
        let event = parse_line("TASK [common : Install Nginx on host] ***").unwrap();
        assert_eq!(event, "Installing Nginx web server");
    }

    #[test]
    fn test_unknown_task_passes_through_truncated() {
        let long_name = "A".repeat(80);
        let event = parse_line(&format!("TASK [{long_name}] ***")).unwrap();
        assert_eq!(event.chars().count(), 60);
        assert!(event.ends_with("..."));
    }

    #[test]
    fn test_suppressed_lines() {
        assert_eq!(parse_line("ok: [alpha]"), None);
        assert_eq!(parse_line("skipping: [alpha]"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("random unmatched noise"), None);
        assert_eq!(
            parse_line("[WARNING]: Skipping group foo as it is not a mapping"),
            None
        );
    }

    #[test]
    fn test_changed_lines() {
        assert_eq!(
            parse_line("changed: [alpha]"),
            Some("Modified on alpha".to_string())
        );
        assert_eq!(
            parse_line("changed:"),
            Some("Configuration updated".to_string())
        );
    }

    #[test]
    fn test_failed_line_truncates_detail() {
        let detail = "x".repeat(120);
        let event = parse_line(&format!("fatal: [alpha]: FAILED! => {detail}")).unwrap();
        assert!(event.starts_with("Error: "));
        assert!(event.ends_with("..."));
        assert_eq!(event.trim_start_matches("Error: ").chars().count(), 80);
    }

    #[test]
    fn test_unreachable_and_recap() {
        assert_eq!(
            parse_line("alpha | UNREACHABLE! => ..."),
            Some("Target unreachable - check SSH connection".to_string())
        );
        assert_eq!(
            parse_line("PLAY RECAP *****"),
            Some("Summary of execution".to_string())
        );
    }
}
