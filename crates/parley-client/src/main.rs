//! # parley-client
//!
//! Thin interactive native client for the chat backend: a numbered text menu
//! on stdin, newline-delimited JSON envelopes out, broadcast lines from the
//! server printed as they arrive. All the interesting behavior lives on the
//! server side; this binary is deliberately just I/O glue.

use std::io::Write as _;

use anyhow::bail;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use parley_shared::{wire, Envelope, Operation, Profile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let addr = std::env::var("PARLEY_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());
    let stream = TcpStream::connect(&addr).await?;
    println!("Connected to {addr}");

    let (read_half, mut writer) = stream.into_split();

    // Print broadcast lines as they arrive, interleaved with the menu.
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            println!("{line}");
        }
        println!("Server closed the connection.");
    });

    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let name = ask(&mut input, "Display name: ").await?;
    if name.is_empty() {
        bail!("a display name is required");
    }
    send(&mut writer, &Envelope::login(&name)).await?;

    print_menu();
    loop {
        let choice = ask(&mut input, "> ").await?;
        match choice.as_str() {
            "1" => {
                let body = ask(&mut input, "message: ").await?;
                send(&mut writer, &Envelope::chat(&name, body)).await?;
            }
            "2" => {
                let target = ask(&mut input, "to: ").await?;
                let body = ask(&mut input, "message: ").await?;
                send(&mut writer, &Envelope::private(&name, target, body)).await?;
            }
            "3" => {
                let group = ask(&mut input, "group: ").await?;
                let body = ask(&mut input, "message: ").await?;
                send(&mut writer, &Envelope::group(&name, group, body)).await?;
            }
            "4" => {
                let group = ask(&mut input, "group name: ").await?;
                send(&mut writer, &Envelope::new(&name, Operation::CreateGroup, group)).await?;
            }
            "5" => send(&mut writer, &Envelope::new(&name, Operation::ListGroups, "")).await?,
            "6" => send(&mut writer, &Envelope::new(&name, Operation::ListUsers, "")).await?,
            "7" => {
                let age = ask(&mut input, "age (blank to skip): ").await?;
                let gender = ask(&mut input, "gender (blank to skip): ").await?;
                let profile = Profile {
                    age: age.parse().ok(),
                    gender: (!gender.is_empty()).then_some(gender),
                };
                let body = serde_json::to_string(&profile)?;
                send(&mut writer, &Envelope::new(&name, Operation::UpdateUser, body)).await?;
            }
            "8" => {
                send(&mut writer, &Envelope::logout(&name)).await?;
                println!("Bye.");
                return Ok(());
            }
            "" => {}
            _ => print_menu(),
        }
    }
}

async fn send(writer: &mut OwnedWriteHalf, env: &Envelope) -> anyhow::Result<()> {
    writer.write_all(wire::encode_frame(env)?.as_bytes()).await?;
    Ok(())
}

async fn ask(input: &mut Lines<BufReader<Stdin>>, prompt: &str) -> anyhow::Result<String> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    match input.next_line().await? {
        Some(line) => Ok(line.trim().to_string()),
        None => bail!("stdin closed"),
    }
}

fn print_menu() {
    println!("=== parley ===");
    println!("1 - public message");
    println!("2 - private message");
    println!("3 - group message");
    println!("4 - create group");
    println!("5 - list groups");
    println!("6 - list users");
    println!("7 - update profile");
    println!("8 - quit");
}
