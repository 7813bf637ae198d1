//! `yuume chat` — interactive conversation in the terminal.
//!
//! Renders the stored transcript, reads lines from stdin, and streams
//! engine events back into the terminal as they happen.

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use yuume_engine::{ChatClient, ConnectionStatus, EngineConfig, EngineEvent};
use yuume_protocol::{Message, MessageKind, OrderCard, OrderFormConfig, ProductCard, Sender, SessionStatus};

pub async fn run(config: EngineConfig) -> anyhow::Result<()> {
    let client = ChatClient::spawn(config)?;
    client.set_chat_open(true).await;
    let mut events = client.subscribe();

    println!();
    println!(
        "  {} v{}  {}",
        style("yuume").magenta().bold(),
        crate::VERSION,
        style("(/reset starts over, /quit leaves)").dim()
    );
    println!();

    for message in client.snapshot().messages.iter() {
        print_message(message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                match text {
                    "/quit" | "/exit" => break,
                    "/reset" => client.reset_session().await,
                    _ => {
                        if let Err(err) = client.send_message(text.to_string()).await {
                            println!("  {}", style(format!("cannot send: {err}")).red());
                        }
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => render_event(&client, event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        component = "cli",
                        event = "cli.events.lagged",
                        skipped,
                        "Event stream lagged"
                    );
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.shutdown().await;
    println!();
    Ok(())
}

fn render_event(client: &ChatClient, event: EngineEvent) {
    match event {
        // Our own sends are already on screen as the typed line
        EngineEvent::MessageAppended { message } => {
            if message.sender != Sender::User {
                print_message(&message);
            }
        }
        EngineEvent::MessageUpdated { message } => {
            print_message(&message);
        }
        EngineEvent::MessagesMerged => {
            println!("  {}", style("— synced with the server —").dim());
        }
        EngineEvent::SessionReplaced { .. } => {
            println!();
            println!("  {}", style("— new conversation —").dim());
            for message in client.snapshot().messages.iter() {
                print_message(message);
            }
        }
        EngineEvent::StatusChanged { status } => {
            println!("  {}", style(status_line(status)).dim());
        }
        EngineEvent::AgentChanged { agent } => match agent {
            Some(agent) => {
                let name = agent.name.as_deref().unwrap_or("a teammate");
                println!("  {}", style(format!("{name} joined the conversation")).yellow());
            }
            None => println!("  {}", style("back with the assistant").dim()),
        },
        EngineEvent::ThinkingChanged { thinking } => {
            if let Some(thinking) = thinking {
                let label = thinking
                    .intent
                    .map(|intent| format!("yuume is thinking ({intent})…"))
                    .unwrap_or_else(|| "yuume is thinking…".to_string());
                println!("  {}", style(label).dim());
            }
        }
        EngineEvent::SuggestionsChanged { suggestions } => {
            if !suggestions.is_empty() {
                println!("  {}", style(format!("try: {}", suggestions.join(" · "))).dim());
            }
        }
        EngineEvent::ConnectionChanged { status } => {
            let label = match status {
                ConnectionStatus::Online => "online",
                ConnectionStatus::Reconnecting => "reconnecting…",
                ConnectionStatus::Offline => "offline",
            };
            println!("  {}", style(label).dim());
        }
        EngineEvent::NudgeRequested { .. } => {}
    }
}

fn status_line(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "conversation active",
        SessionStatus::Escalated => "a human teammate is taking over",
        SessionStatus::Completed => "conversation closed",
        SessionStatus::Abandoned => "conversation abandoned",
    }
}

fn print_message(message: &Message) {
    if message.hidden {
        return;
    }
    match message.sender {
        Sender::User => {
            if let Some(text) = message.kind.text() {
                println!("  {} {}", style("you ›").cyan().bold(), text);
            }
        }
        Sender::Assistant | Sender::System => print_assistant(message),
    }
}

fn print_assistant(message: &Message) {
    let tag = match &message.kind {
        MessageKind::ClientError { .. } => style("yuume ›").red().bold(),
        MessageKind::Nudge { .. } => style("yuume ›").magenta().bold(),
        _ => style("yuume ›").green().bold(),
    };

    if let Some(text) = message.kind.text() {
        println!("  {} {}", tag, text);
    }

    match &message.kind {
        MessageKind::ProductCards { products, .. } if !products.is_empty() => {
            print_products(products);
        }
        MessageKind::OrderResults { orders, success, .. } => {
            if !orders.is_empty() {
                print_orders(orders);
            } else if !success {
                println!("  {}", style("no matching order found").dim());
            }
        }
        MessageKind::OrderForm { form, .. } => print_form(form),
        MessageKind::Unknown => {
            println!("  {} {}", tag, style("(unsupported message)").dim());
        }
        _ => {}
    }
}

fn print_products(products: &[ProductCard]) {
    let mut table = comfy_table::Table::new();
    table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
    table.set_header(vec!["Product", "Price", "Link"]);
    for product in products {
        table.add_row(vec![
            product.title.clone(),
            product.price.clone().unwrap_or_default(),
            product.product_url.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
}

fn print_orders(orders: &[OrderCard]) {
    let mut table = comfy_table::Table::new();
    table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
    table.set_header(vec!["Order", "Status", "Placed", "Tracking"]);
    for order in orders {
        table.add_row(vec![
            order.order_number.clone(),
            order.status.clone().unwrap_or_default(),
            order.placed_at.clone().unwrap_or_default(),
            order.tracking_url.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
}

fn print_form(form: &OrderFormConfig) {
    if let Some(title) = &form.title {
        println!("  {}", style(title).bold());
    }
    for field in &form.fields {
        let required = if field.required { " (required)" } else { "" };
        println!("    {}: {}{}", field.name, field.label, required);
    }
    println!(
        "  {}",
        style("(order lookup forms are not interactive here)").dim()
    );
}
