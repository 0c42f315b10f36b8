//! Interactive client for a RespVault server
//!
//! Reads whitespace-separated commands from stdin, sends each as a RESP
//! request and prints the reply.

use clap::Parser;
use respvault::{Client, Value};
use std::io::{self, Write};

#[derive(Parser, Debug)]
#[command(name = "respvault-client")]
#[command(about = "Interactive RespVault client")]
struct Args {
    /// Server address (host:port)
    #[arg(default_value = "127.0.0.1:6379")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("Connecting to RespVault server at {}...", args.addr);
    let mut client = Client::connect(&args.addr).await?;
    println!("Connected! Type 'help' for available commands or 'quit' to exit.");

    loop {
        print!("{}> ", args.addr);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        match input {
            "" => continue,
            "quit" | "exit" => break,
            "help" => print_help(),
            _ => {
                let parts: Vec<&str> = input.split_whitespace().collect();
                match client.command(parts).await {
                    Ok(reply) => print!("{}", format_reply(&reply, 0)),
                    Err(e) => {
                        println!("Error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    client.close().await?;
    println!("Goodbye!");
    Ok(())
}

/// Render a reply the way redis-cli does.
fn format_reply(value: &Value, indent: usize) -> String {
    match value {
        Value::SimpleString(s) => format!("{}\n", s),
        Value::Error(e) => format!("(error) {}\n", e),
        Value::Integer(n) => format!("(integer) {}\n", n),
        Value::Bulk(data) => format!("\"{}\"\n", String::from_utf8_lossy(data).escape_debug()),
        Value::Null => "(nil)\n".to_string(),
        Value::Array(items) if items.is_empty() => "(empty array)\n".to_string(),
        Value::Array(items) => {
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&" ".repeat(indent));
                }
                let label = format!("{}) ", i + 1);
                out.push_str(&label);
                out.push_str(&format_reply(item, indent + label.len()));
            }
            out
        }
    }
}

fn print_help() {
    println!("Available commands:");
    println!("  PING [message]");
    println!("  SET <key> <value>");
    println!("  GET <key>");
    println!("  DEL <key> [key ...]");
    println!("  EXISTS <key> [key ...]");
    println!("  INCR <key>");
    println!("  HSET <key> <field> <value>");
    println!("  HGET <key> <field>");
    println!("  HGETALL <key>");
    println!("  help               - Show this help message");
    println!("  quit               - Exit the client");
}
