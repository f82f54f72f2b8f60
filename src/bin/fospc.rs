// src/bin/fospc.rs

//! An interactive FOSP client shell.

use anyhow::Result;
use fospd::client::Client;
use fospd::core::protocol::{Response, Status};
use fospd::core::url::Url;
use std::env;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::filter::EnvFilter;

struct Shell {
    client: Option<Client>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        ))
        .compact()
        .init();

    let args: Vec<String> = env::args().collect();
    let mut shell = Shell { client: None };

    // `fospc [host [user password]]` connects and authenticates up front.
    if let Some(host) = args.get(1) {
        shell.open(host).await;
        if let (Some(user), Some(password)) = (args.get(2), args.get(3)) {
            shell.auth(&format!("{user} {password}")).await;
        }
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    prompt().await?;
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            prompt().await?;
            continue;
        }
        let (command, args) = match input.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (input, ""),
        };
        match command {
            "quit" | "exit" => break,
            "open" => shell.open(args).await,
            "register" => shell.register(args).await,
            "auth" => shell.auth(args).await,
            "get" => shell.simple(args, Command::Get).await,
            "list" => shell.simple(args, Command::List).await,
            "delete" => shell.simple(args, Command::Delete).await,
            "create" => shell.with_body(args, Command::Create).await,
            "patch" => shell.with_body(args, Command::Patch).await,
            "read" => shell.read(args).await,
            "write" => shell.write(args).await,
            "help" => print_help(),
            other => println!("Unknown command \"{other}\", try \"help\""),
        }
        prompt().await?;
    }

    if let Some(client) = shell.client.take() {
        client.close().await;
    }
    Ok(())
}

enum Command {
    Get,
    List,
    Delete,
    Create,
    Patch,
}

impl Shell {
    async fn open(&mut self, host: &str) {
        if host.is_empty() {
            println!("Usage: open <host>");
            return;
        }
        match Client::open(host).await {
            Ok(client) => {
                // Print pushed notifications as they come in.
                if let Some(mut notifications) = client.take_notifications() {
                    tokio::spawn(async move {
                        while let Some(notification) = notifications.recv().await {
                            println!(
                                "\n{} {} {}",
                                notification.event,
                                notification.url,
                                String::from_utf8_lossy(&notification.body)
                            );
                        }
                    });
                }
                self.client = Some(client);
                println!("Connected to {host}");
            }
            Err(e) => println!("Could not connect: {e}"),
        }
    }

    fn connected(&self) -> Option<&Client> {
        if self.client.is_none() {
            println!("Not connected, use \"open <host>\" first");
        }
        self.client.as_ref()
    }

    async fn register(&mut self, args: &str) {
        let Some((name, password)) = args.split_once(' ') else {
            println!("Usage: register <name> <password>");
            return;
        };
        let Some(client) = self.connected() else {
            return;
        };
        print_result(client.register(name, password.trim()).await);
    }

    async fn auth(&mut self, args: &str) {
        let Some((name, password)) = args.split_once(' ') else {
            println!("Usage: auth <name> <password>");
            return;
        };
        let Some(client) = self.connected() else {
            return;
        };
        print_result(client.authenticate(name, password.trim()).await);
    }

    async fn simple(&mut self, args: &str, command: Command) {
        let Ok(url) = Url::parse(args) else {
            println!("Invalid URL \"{args}\"");
            return;
        };
        let Some(client) = self.connected() else {
            return;
        };
        let result = match command {
            Command::Get => client.get(&url).await,
            Command::List => client.list(&url).await,
            Command::Delete => client.delete(&url).await,
            Command::Create | Command::Patch => unreachable!(),
        };
        print_result(result);
    }

    async fn with_body(&mut self, args: &str, command: Command) {
        let (raw_url, body) = match args.split_once(' ') {
            Some((raw_url, body)) => (raw_url, body.trim().to_string()),
            None => (args, String::new()),
        };
        let Ok(url) = Url::parse(raw_url) else {
            println!("Invalid URL \"{raw_url}\"");
            return;
        };
        let Some(client) = self.connected() else {
            return;
        };
        let result = match command {
            Command::Create => client.create(&url, body).await,
            Command::Patch => client.patch(&url, body).await,
            _ => unreachable!(),
        };
        print_result(result);
    }

    async fn read(&mut self, args: &str) {
        let Some((raw_url, file)) = args.split_once(' ') else {
            println!("Usage: read <url> <file>");
            return;
        };
        let Ok(url) = Url::parse(raw_url) else {
            println!("Invalid URL \"{raw_url}\"");
            return;
        };
        let Some(client) = self.connected() else {
            return;
        };
        match client.read(&url).await {
            Ok(response) if response.status == Status::Succeeded => {
                match tokio::fs::write(file.trim(), &response.body).await {
                    Ok(()) => println!(
                        "SUCCEEDED {} ({} bytes written to {file})",
                        response.code,
                        response.body.len()
                    ),
                    Err(e) => println!("Could not write {file}: {e}"),
                }
            }
            result => print_result(result),
        }
    }

    async fn write(&mut self, args: &str) {
        let Some((raw_url, file)) = args.split_once(' ') else {
            println!("Usage: write <url> <file>");
            return;
        };
        let Ok(url) = Url::parse(raw_url) else {
            println!("Invalid URL \"{raw_url}\"");
            return;
        };
        let data = match tokio::fs::read(file.trim()).await {
            Ok(data) => data,
            Err(e) => {
                println!("Could not read {file}: {e}");
                return;
            }
        };
        let Some(client) = self.connected() else {
            return;
        };
        print_result(client.write(&url, data).await);
    }
}

fn print_result(result: Result<Response, fospd::FospError>) {
    match result {
        Ok(response) => {
            if response.body.is_empty() {
                println!("{} {}", response.status, response.code);
            } else {
                println!(
                    "{} {}\n{}",
                    response.status,
                    response.code,
                    String::from_utf8_lossy(&response.body)
                );
            }
        }
        Err(e) => println!("Request failed: {e}"),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  open <host>                  connect to a server");
    println!("  register <name> <password>   create a new user");
    println!("  auth <name> <password>       log in");
    println!("  get <url>                    fetch an object");
    println!("  list <url>                   list child objects");
    println!("  create <url> [json]          create an object");
    println!("  patch <url> <json>           modify an object");
    println!("  delete <url>                 delete an object");
    println!("  read <url> <file>            download the attachment");
    println!("  write <url> <file>           upload an attachment");
    println!("  quit                         leave");
}

async fn prompt() -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;
    Ok(())
}
