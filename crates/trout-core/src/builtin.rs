//! The stock unit table of the control panel.

use crate::config::UnitConfig;
use crate::registry::LaunchCommand;
use std::collections::HashMap;

/// ROS packages and the launch file (plus arguments) started for each
const ROS_LAUNCHES: &[(&str, &str)] = &[
    ("mavros", "apm.launch fcu_url:=udp://:14555@"),
    ("rosbridge_server", "rosbridge_websocket.launch"),
    ("joystick_controller", "joystick_controller.launch"),
    ("usbl_ros", "usbl_ros.launch"),
    ("ut_data_extractor", "ut_probe.launch"),
    ("external_temp", "external_mavros.launch"),
    ("uwrov", "sonar.launch"),
    ("map_downloader", "map_downloader.launch"),
    ("oven_media_recoder", "recorder.launch"),
    ("notification_sender", "notification_sender.launch"),
    ("heading_depth_sender", "sender.launch"),
    ("waterlinked_a50_ros_driver", "launch_dvl.launch"),
];

pub const NODES_GROUP: &str = "nodes";
pub const APPS_GROUP: &str = "apps";

const MAIN_APP_URL: &str = "http://localhost:5173";

pub fn builtin_units() -> Vec<UnitConfig> {
    let nodes = ROS_LAUNCHES.iter().map(|(package, launch)| UnitConfig {
        id: package.to_string(),
        display_name: Some(package.to_string()),
        command: LaunchCommand::shell(format!("roslaunch {package} {launch}")),
        group: Some(NODES_GROUP.to_string()),
        working_directory: None,
        env: HashMap::new(),
        open_url: None,
    });

    let apps = [
        ("joystick_configurator", "Joystick Configurator", "./joystick.sh", None),
        ("main_app", "Main App", "./ichub.sh", Some(MAIN_APP_URL)),
    ]
    .into_iter()
    .map(|(id, name, script, url)| UnitConfig {
        id: id.to_string(),
        display_name: Some(name.to_string()),
        command: LaunchCommand::exec(script, Vec::<String>::new()),
        group: Some(APPS_GROUP.to_string()),
        working_directory: None,
        env: HashMap::new(),
        open_url: url.map(str::to_string),
    });

    nodes.chain(apps).collect()
}

pub fn builtin_guardian_command() -> LaunchCommand {
    LaunchCommand::exec("roscore", Vec::<String>::new())
}
