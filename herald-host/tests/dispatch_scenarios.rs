//! End-to-end dispatch scenarios through a fully wired framework

use herald_api::testing::RecordingEnvironment;
use herald_host::{
    AuditEventType, CommandCall, CommandDescriptor, CommandOutcome, DispatchOutcome, Extension,
    ExtensionCatalog, ExtensionContext, ExtensionError, Framework, MemoryAuditSink,
    PermissionStore, RootConfig, Services,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PERMISSIONS: &str = r#"{"admins":["alice"],"users":{"bob":{"level":1}}}"#;

fn write_root(dir: &Path, extensions: &[&str]) -> RootConfig {
    fs::write(dir.join("permissions.json"), PERMISSIONS).unwrap();
    let path = dir.join("config.json");
    fs::write(
        &path,
        json!({
            "connection": { "username": "herald" },
            "commandPrefix": "!",
            "extensions": extensions,
        })
        .to_string(),
    )
    .unwrap();
    RootConfig::load(&path).unwrap()
}

fn pong_and_loopclick(hits: Arc<AtomicUsize>) -> ExtensionCatalog {
    ExtensionCatalog::new().with("basic", move || -> Box<dyn Extension> {
        let hits = hits.clone();
        Box::new(move |ctx: &ExtensionContext| -> Result<(), ExtensionError> {
            let env = ctx.environment().clone();
            ctx.register(CommandDescriptor::new("ping", move |_| {
                env.send_message("> Pong.");
                Ok(CommandOutcome::Done)
            }))?;

            let hits = hits.clone();
            ctx.register(
                CommandDescriptor::new("loopclick", move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(CommandOutcome::Done)
                })
                .level(2),
            )?;
            Ok(())
        })
    })
}

#[test]
fn test_bob_ping_and_stranger_loopclick() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_root(dir.path(), &["basic"]);
    let env = Arc::new(RecordingEnvironment::new("herald"));
    let hits = Arc::new(AtomicUsize::new(0));

    let framework = Framework::from_config(&config, env.clone(), pong_and_loopclick(hits.clone()));
    assert!(framework.extensions().is_success());

    let outcome = framework.dispatcher().dispatch("bob", "!ping");
    assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
    assert_eq!(env.messages(), vec!["> Pong.".to_string()]);

    env.clear();
    let outcome = framework.dispatcher().dispatch("stranger", "!loopclick left");
    assert!(matches!(
        outcome,
        DispatchOutcome::Denied {
            required: 2,
            actual: 0,
            ..
        }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    let messages = env.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("need level 2, you have level 0"));

    // alice is admin, so level 99 passes regardless
    framework.dispatcher().dispatch("alice", "!LOOPCLICK left");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_config_and_mandatory_field() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_root(dir.path(), &["tolerant", "strict", "after"]);

    let catalog = ExtensionCatalog::new()
        .with("tolerant", || -> Box<dyn Extension> {
            Box::new(|ctx: &ExtensionContext| -> Result<(), ExtensionError> {
                assert!(ctx.config().is_empty());
                ctx.register(CommandDescriptor::new("tolerant", |_| Ok(CommandOutcome::Done)))?;
                Ok(())
            })
        })
        .with("strict", || -> Box<dyn Extension> {
            Box::new(|ctx: &ExtensionContext| -> Result<(), ExtensionError> {
                let Some(token) = ctx.config().get_str("token") else {
                    return Err(ExtensionError::Config("token is required".into()));
                };
                let token = token.to_string();
                ctx.register(CommandDescriptor::new("strict", move |call: CommandCall| {
                    Ok(CommandOutcome::rejected(format!("{} {}", token, call.actor)))
                }))?;
                Ok(())
            })
        })
        .with("after", || -> Box<dyn Extension> {
            Box::new(|ctx: &ExtensionContext| -> Result<(), ExtensionError> {
                ctx.register(CommandDescriptor::new("after", |_| Ok(CommandOutcome::Done)))?;
                Ok(())
            })
        });

    let env = Arc::new(RecordingEnvironment::new("herald"));
    let framework = Framework::from_config(&config, env, catalog);

    let report = framework.extensions();
    assert_eq!(report.loaded_names(), vec!["tolerant", "after"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "strict");

    let commands = &framework.services().commands;
    assert!(commands.contains("tolerant"));
    assert!(!commands.contains("strict"));
    assert!(commands.contains("after"));
}

#[test]
fn test_own_messages_and_unknown_commands() {
    let env = Arc::new(RecordingEnvironment::new("herald"));
    let audit = Arc::new(MemoryAuditSink::new());
    let services = Services::with_audit(
        env.clone(),
        Arc::new(PermissionStore::from_snapshot(
            serde_json::from_str(PERMISSIONS).unwrap(),
        )),
        audit.clone(),
    );
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    services
        .commands
        .register(CommandDescriptor::new("ping", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutcome::Done)
        }))
        .unwrap();

    let framework = Framework::new(services);
    framework.dispatcher().dispatch("herald", "!ping");
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert!(env.messages().is_empty());

    framework.dispatcher().dispatch("bob", "!unknowncmd");
    assert_eq!(env.messages(), vec!["> Unknown command.".to_string()]);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(audit.of_type(AuditEventType::UnknownCommand).len(), 1);
}
