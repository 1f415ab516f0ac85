//! Listen Command - print global server events

use anyhow::Result;
use clap::Args;
use testpilot_common::EventKind;
use tokio::sync::mpsc;

use crate::output::{print_event, print_info, OutputFormat};
use crate::session::{self, Settings};

#[derive(Args)]
pub struct ListenArgs {
    /// Event kinds to print (repeatable); all kinds when omitted
    #[arg(long = "kind", value_name = "KIND")]
    pub kinds: Vec<EventKind>,
}

impl ListenArgs {
    pub fn selected(&self) -> Vec<EventKind> {
        if self.kinds.is_empty() {
            EventKind::ALL.to_vec()
        } else {
            let mut kinds = self.kinds.clone();
            kinds.sort();
            kinds.dedup();
            kinds
        }
    }
}

pub async fn execute(args: ListenArgs, settings: &Settings, format: OutputFormat) -> Result<()> {
    let client = settings.connect().await?;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let kinds = args.selected();
    let listeners: Vec<_> = kinds
        .iter()
        .map(|&kind| {
            let tx = tx.clone();
            client.on(kind, move |event| {
                let _ = tx.send(event.clone());
            })
        })
        .collect();

    if format != OutputFormat::Json {
        let names: Vec<_> = kinds.iter().map(EventKind::as_str).collect();
        print_info(&format!("Listening for {} (Ctrl-C to stop)", names.join(", ")));
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(event) => print_event(&event, format),
                None => break,
            },
        }
    }

    for listener in listeners {
        client.off(listener);
    }
    session::shutdown(&client).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_every_kind() {
        let args = ListenArgs { kinds: vec![] };
        assert_eq!(args.selected().len(), EventKind::ALL.len());
    }

    #[test]
    fn test_selected_kinds_deduplicated() {
        let args = ListenArgs {
            kinds: vec![
                EventKind::Screenshot,
                EventKind::ExecutionEvent,
                EventKind::Screenshot,
            ],
        };
        assert_eq!(
            args.selected(),
            vec![EventKind::ExecutionEvent, EventKind::Screenshot]
        );
    }
}
