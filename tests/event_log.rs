use anyhow::{Context, Result};
use elvis_procsim::{logging, protocols::stp::StpConfig, Internet};
use std::{fs, time::Duration};

#[test]
fn events_are_written_as_json_lines() -> Result<()> {
    let dir = std::env::temp_dir().join(format!("elvis-procsim-events-{}", std::process::id()));
    logging::init_events(&dir)?;

    let mut internet = Internet::new();
    let a = internet.add_switch("a");
    let b = internet.add_switch("b");
    internet.link(a, b);
    for switch in [a, b] {
        internet.device_mut(switch).start_spanning_tree(StpConfig {
            send_interval: Duration::from_millis(100),
            ..Default::default()
        });
    }
    internet.run_ticks(50);

    let log = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("debug-"))
        })
        .context("no log file was created")?;
    let contents = fs::read_to_string(&log)?;
    fs::remove_dir_all(&dir)?;

    let lines: Vec<_> = contents.lines().collect();
    assert!(!lines.is_empty());
    assert!(lines.iter().all(|line| line.starts_with('{')));
    assert!(lines.iter().any(|line| line.contains("\"target\":\"BRIDGE\"")));
    assert!(lines.iter().any(|line| line.contains("\"target\":\"PROCESS\"")));
    Ok(())
}
