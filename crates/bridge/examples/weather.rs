//! Weather assistant demo.
//!
//! Run with: cargo run -p bridge --example weather [-- toolbridge.toml]
//!
//! Without a config file the weather tool runs in-process. With a `[host]`
//! section, every function that host implements is registered as well and
//! takes precedence over the in-process tool of the same name.

use std::sync::Arc;

use bridge::{AnyMap, BridgeConfig, PropertySchema, ScriptedModel, Session, Step, ToolDefinition};
use indexmap::IndexMap;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const PROMPT: &str = "What's the weather like in Tokyo?";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };

    let registry = Arc::new(config.tool_bridge());
    registry.register("weather_tool", |args: AnyMap| async move {
        let city: String = args.get("city")?;
        Ok::<_, bridge::Error>(
            AnyMap::new()
                .with("city", city)
                .with("temperature", 72.0)
                .with("condition", "sunny")
                .with("humidity", 65.0),
        )
    });

    if let Some(host) = &config.host {
        println!("Spawning host: {} {:?}", host.command, host.args);
        let link = Arc::new(host.spawn().await?);
        let count = registry.register_host_functions(link).await?;
        println!("Registered {count} host functions");
    }

    let tool = ToolDefinition::bridged(
        "weather_tool",
        "Get current weather information for a city",
        IndexMap::from([(
            "city".to_string(),
            PropertySchema::string().with_description("The city to get weather for"),
        )]),
    );

    let model = ScriptedModel::new().on_prompt(
        PROMPT,
        vec![
            Step::token("Let me look that up. "),
            Step::call_tool("weather_tool", json!({ "city": "Tokyo" })),
            Step::token(" Looks like a good day to be outside."),
        ],
    );

    let session = Session::new(
        &model,
        config
            .session_config()
            .with_instructions("You are a helpful weather assistant")
            .with_tool(tool),
        Arc::clone(&registry),
    )?;

    println!("Instructions:\n{}\n", session.instructions());
    println!("> {PROMPT}");

    let mut printed = 0;
    let result = session
        .stream_response(PROMPT, |so_far| {
            print!("{}", &so_far[printed..]);
            printed = so_far.len();
        })
        .await;
    println!();

    match result {
        Ok(_) => println!("\n[{:?}]", session.state().phase),
        Err(e) => {
            let info = serde_json::to_string_pretty(&e.to_error_info())?;
            println!("\nStream failed:\n{info}");
        }
    }

    Ok(())
}
