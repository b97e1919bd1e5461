use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use trout::command::{HELP, PanelCommand};
use trout::logging::init_logging;
use trout::{ChangeCause, ControlPanel, PanelConfig, UnitAction, UnitState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => PanelConfig::load(&path)?,
        None => PanelConfig::default(),
    };
    init_logging(&config.log)?;

    let panel = ControlPanel::boot(config).await?;
    print_events(&panel);
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        match PanelCommand::parse(&line) {
            Ok(Some(PanelCommand::Quit)) => break,
            Ok(Some(command)) => run(&panel, command).await,
            Ok(None) => {}
            Err(e) => println!("error: {e}"),
        }
    }

    panel.shutdown().await;
    Ok(())
}

fn print_events(panel: &ControlPanel) {
    let mut events = panel.supervisor().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(change) => match change.cause {
                    ChangeCause::Exited { code } => {
                        println!("{} exited (code {code:?})", change.unit_id)
                    }
                    ChangeCause::LaunchFailed(cause) | ChangeCause::TerminationFailed(cause) => {
                        println!("{} {}: {cause}", change.unit_id, change.state)
                    }
                    ChangeCause::Started | ChangeCause::Stopped => {
                        println!("{} {}", change.unit_id, change.state)
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn run(panel: &ControlPanel, command: PanelCommand) {
    let supervisor = panel.supervisor();
    match command {
        PanelCommand::Unit { action, unit_id } => {
            match supervisor.apply(action, &unit_id).await {
                Ok(UnitState::Running { .. }) => {
                    let unit = supervisor.registry().lookup(&unit_id).ok();
                    if let Some((unit, url)) =
                        unit.and_then(|unit| unit.open_url.as_ref().map(|url| (unit, url)))
                    {
                        println!("{} is available at {url}", unit.display_name);
                    }
                }
                Ok(UnitState::Stopped) => {}
                Err(e) => println!("error: {e}"),
            }
        }
        PanelCommand::Group { action, group } => {
            let results = match action {
                UnitAction::Start => supervisor.start_group(&group).await,
                UnitAction::Stop => supervisor.stop_group(&group).await,
                UnitAction::Toggle => supervisor.toggle_group(&group).await,
            };
            match results {
                Ok(results) => {
                    for (unit_id, result) in results {
                        if let Err(e) = result {
                            println!("{unit_id}: {e}");
                        }
                    }
                }
                Err(e) => println!("error: {e}"),
            }
        }
        PanelCommand::Status(Some(unit_id)) => match supervisor.query(&unit_id).await {
            Ok(state) => println!("{unit_id:<28} {state}"),
            Err(e) => println!("error: {e}"),
        },
        PanelCommand::Status(None) => {
            for unit in supervisor.registry().units() {
                if let Ok(state) = supervisor.query(unit.id.as_str()).await {
                    println!("{:<28} {state}", unit.id.as_str());
                }
            }
            println!("groups: {}", supervisor.registry().groups().join(", "));
            if let Some(guardian) = panel.guardian() {
                println!("{:<28} {:?}", "guardian", guardian.state().await);
            }
        }
        PanelCommand::Quit => {}
    }
}
