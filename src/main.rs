//! rpcbind - command-line JSON-RPC client.
//!
//! ```text
//! rpcbind call  <Method> [json-arg ...]   print the result
//! rpcbind watch <Method> [json-arg ...]   print each pushed element
//! ```
//!
//! The socket, namespace and timing come from `RPCBIND_*` environment
//! variables (see [`ClientConfig::from_env`]).

use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpcbind::{Client, ClientConfig, Error, Subscription};

const USAGE: &str = "usage: rpcbind <call|watch> <Method> [json-arg ...]";

#[derive(Debug)]
enum Command {
    Call,
    Watch,
}

fn parse_args(args: &[String]) -> Result<(Command, &str, Vec<Value>)> {
    let (command, rest) = args.split_first().ok_or_else(|| anyhow!(USAGE))?;
    let command = match command.as_str() {
        "call" => Command::Call,
        "watch" => Command::Watch,
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    };

    let (method, json_args) = rest.split_first().ok_or_else(|| anyhow!(USAGE))?;
    let params = json_args
        .iter()
        .map(|arg| {
            serde_json::from_str(arg).with_context(|| format!("Argument is not valid JSON: {}", arg))
        })
        .collect::<Result<Vec<Value>>>()?;

    Ok((command, method.as_str(), params))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rpcbind=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, method, params) = parse_args(&args)?;

    let config = ClientConfig::from_env();
    let (client, closer) = Client::connect(&config).await?;

    let result = match command {
        Command::Call => call(&client, method, params).await,
        Command::Watch => watch(&client, method, params).await,
    };

    closer.close();
    result
}

async fn call(client: &Client, method: &str, params: Vec<Value>) -> Result<()> {
    let bound = client.bind::<Vec<Value>, Result<Value, Error>>(method)?;
    let value = bound.call(params).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch(client: &Client, method: &str, params: Vec<Value>) -> Result<()> {
    let bound = client.bind::<Vec<Value>, Result<Subscription<Value>, Error>>(method)?;
    let mut elements = bound.call(params).await?;

    loop {
        tokio::select! {
            element = elements.next() => {
                let Some(element) = element else {
                    info!("Subscription closed by server");
                    break;
                };
                println!("{}", serde_json::to_string(&element)?);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing subscription");
                break;
            }
        }
    }

    elements.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_call() {
        let args = args(&["call", "Add", "2", "3"]);
        let (command, method, params) = parse_args(&args).unwrap();
        assert!(matches!(command, Command::Call));
        assert_eq!(method, "Add");
        assert_eq!(params, vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_parse_watch_without_args() {
        let args = args(&["watch", "ChainNotify"]);
        let (command, method, params) = parse_args(&args).unwrap();
        assert!(matches!(command, Command::Watch));
        assert_eq!(method, "ChainNotify");
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["call"])).is_err());
        assert!(parse_args(&args(&["poke", "Add"])).is_err());

        let err = parse_args(&args(&["call", "Add", "{oops"])).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
