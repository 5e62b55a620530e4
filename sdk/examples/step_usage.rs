//! Example showing how a host executor consumes steps

use sdk::step::{params, single};
use sdk::{codes, Step, Tool};

fn main() {
    // A step as the control core would emit it
    let step = Step::for_tool(Tool::ReadFile, single("path", "src/main.rs"))
        .with_reasoning("The entry point is the best place to start");
    println!("{}", serde_json::to_string_pretty(&step).unwrap_or_default());

    match step.tool_kind() {
        Some(tool) if tool.is_file_targeted() => {
            println!("{} targets {}", tool, step.path().unwrap_or("?"));
        }
        Some(tool) => println!("{} has no file target", tool),
        None => println!("unrecognized tool {}", step.tool),
    }

    // Terminal steps carry an answer, an error or a question
    let veto = Step::for_tool(
        Tool::RemoteExec,
        params([("agent_id", "web-01"), ("command", "uptime")]),
    )
    .veto(codes::format(codes::DISCOVERY_REQUIRED, "run discover_agents first"));

    if let Some(error) = veto.error() {
        match codes::code_of(error) {
            Some(codes::DISCOVERY_REQUIRED) => println!("host should offer discovery: {}", error),
            Some(code) => println!("vetoed with {}", code),
            None => println!("failed: {}", error),
        }
    }
}
