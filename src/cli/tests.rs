use super::chat::{classify_input, reauthorize, DeltaPrinter, ReplInput};
use super::model_list::format_model_list;
use super::*;
use crate::core::builtin_models::ModelEntry;
use crate::core::keyring::MemoryCredentialStore;
use crate::core::providers::ProviderKind;
use tokio::io::{AsyncBufReadExt, BufReader};

#[test]
fn defaults_to_chat_when_no_subcommand() {
    let args = Args::try_parse_from(["relaychat"]).unwrap();
    assert!(args.command.is_none());
    assert!(args.model.is_none());
    assert!(args.log.is_none());
}

#[test]
fn set_joins_multi_word_values() {
    let args =
        Args::try_parse_from(["relaychat", "set", "system", "You", "are", "terse."]).unwrap();
    assert_eq!(
        args.command,
        Some(Commands::Set {
            key: "system".into(),
            value: vec!["You".into(), "are".into(), "terse.".into()],
        })
    );
}

#[test]
fn set_accepts_negative_numbers() {
    let args = Args::try_parse_from(["relaychat", "set", "presence-penalty", "-0.5"]).unwrap();
    assert_eq!(
        args.command,
        Some(Commands::Set {
            key: "presence-penalty".into(),
            value: vec!["-0.5".into()],
        })
    );
}

#[test]
fn global_flags_work_after_subcommand() {
    let args = Args::try_parse_from([
        "relaychat",
        "say",
        "--model",
        "gpt-4o",
        "--log",
        "/tmp/relaychat.log",
        "hello",
        "there",
    ])
    .unwrap();
    assert_eq!(args.model.as_deref(), Some("gpt-4o"));
    assert_eq!(
        args.log.as_deref(),
        Some(std::path::Path::new("/tmp/relaychat.log"))
    );
    assert_eq!(
        args.command,
        Some(Commands::Say {
            prompt: vec!["hello".into(), "there".into()],
        })
    );
}

#[test]
fn serve_takes_bind_address() {
    let args = Args::try_parse_from(["relaychat", "serve", "--bind", "0.0.0.0:8080"]).unwrap();
    assert_eq!(
        args.command,
        Some(Commands::Serve {
            bind: Some("0.0.0.0:8080".into()),
        })
    );
    assert!(Args::try_parse_from(["relaychat", "say"]).is_err());
}

#[test]
fn env_credential_takes_precedence() {
    let store = credential_store_from(Some("from-env".into()));
    assert_eq!(store.get().unwrap().as_deref(), Some("from-env"));
}

#[test]
fn delta_printer_emits_only_new_text() {
    let mut printer = DeltaPrinter::new();
    assert_eq!(printer.delta("Hel"), "Hel");
    assert_eq!(printer.delta("Hello"), "lo");
    assert_eq!(printer.delta("Hello"), "");
    assert_eq!(printer.delta("Hello, wörld"), ", wörld");

    let mut out = Vec::new();
    let mut printer = DeltaPrinter::new();
    printer.write_delta("a", &mut out);
    printer.write_delta("abc", &mut out);
    assert_eq!(out, b"abc");
}

#[test]
fn repl_commands_are_recognised() {
    assert_eq!(classify_input("  "), ReplInput::Skip);
    assert_eq!(classify_input("/quit"), ReplInput::Quit);
    assert_eq!(classify_input(" /exit "), ReplInput::Quit);
    assert_eq!(classify_input("/clear"), ReplInput::Clear);
    assert_eq!(classify_input("hello"), ReplInput::Prompt("hello"));
}

#[test]
fn model_list_marks_selection_and_aligns_providers() {
    let entries = vec![
        ModelEntry {
            name: "gpt-4o".into(),
            provider: ProviderKind::Github,
        },
        ModelEntry {
            name: "gemini-1.5-flash".into(),
            provider: ProviderKind::Google,
        },
    ];
    let lines = format_model_list(&entries, "gpt-4o");
    assert_eq!(
        lines,
        vec![
            "* gpt-4o            GitHub Models".to_string(),
            "  gemini-1.5-flash  Google Gemini".to_string(),
        ]
    );
}

#[tokio::test]
async fn rejected_credential_is_replaced_from_input() {
    let store = MemoryCredentialStore::new(Some("old".into()));
    let mut lines = BufReader::new(&b"  new-key \n"[..]).lines();
    let mut out = Vec::new();

    assert!(reauthorize(&mut lines, &store, &mut out).await.unwrap());
    assert_eq!(store.get().unwrap().as_deref(), Some("new-key"));
    assert!(String::from_utf8(out).unwrap().starts_with("New relay credential"));
}

#[tokio::test]
async fn blank_or_missing_answer_keeps_the_credential() {
    let store = MemoryCredentialStore::new(Some("old".into()));
    let mut out = Vec::new();

    let mut lines = BufReader::new(&b"\n"[..]).lines();
    assert!(!reauthorize(&mut lines, &store, &mut out).await.unwrap());

    let mut lines = BufReader::new(&b""[..]).lines();
    assert!(!reauthorize(&mut lines, &store, &mut out).await.unwrap());

    assert_eq!(store.get().unwrap().as_deref(), Some("old"));
}
