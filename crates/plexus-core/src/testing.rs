//! Scripted modules and collaborators shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use plexus_types::config::BusConfig;
use plexus_types::{Command, Event, Params};
use serde_json::{Value, json};

use crate::lifecycle::PhaseTracker;
use crate::message::MessageBus;
use crate::module::{CommandArgs, CommandError, CommandSpec, Module, ModuleContext};
use crate::services::{CrashReporter, Services};

/// A configured bus in the BOOT phase.
pub(crate) fn test_bus() -> Arc<MessageBus> {
    let bus = Arc::new(MessageBus::new(BusConfig::default(), PhaseTracker::new()));
    bus.app_configured();
    bus
}

/// A detached context whose crash reports are recorded.
pub(crate) fn test_context(id: &str) -> (ModuleContext, Arc<RecordingCrashReporter>) {
    let reporter = Arc::new(RecordingCrashReporter::default());
    let services = Services::default().with_crash_reporter(reporter.clone());
    (ModuleContext::new(id, test_bus(), services), reporter)
}

#[derive(Debug, Default)]
pub(crate) struct RecordingCrashReporter {
    reports: Mutex<Vec<Params>>,
}

impl RecordingCrashReporter {
    pub(crate) fn reports(&self) -> Vec<Params> {
        self.reports.lock().unwrap().clone()
    }
}

impl CrashReporter for RecordingCrashReporter {
    fn report_exception(&self, context: Params) {
        self.reports.lock().unwrap().push(context);
    }
}

/// What a [`TestModule`] observed.
#[derive(Debug, Default)]
pub(crate) struct Probe {
    configured: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    ticks: AtomicUsize,
    events: Mutex<Vec<String>>,
    commands: Mutex<Vec<String>>,
}

impl Probe {
    pub(crate) fn configured(&self) -> usize {
        self.configured.load(Ordering::SeqCst)
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

/// Module with scripted commands:
/// `echo`, `greet`, `fail`, `info`, `panic`, `call_self`, `push_self`,
/// `call`, `slow`.
pub(crate) struct TestModule {
    probe: Arc<Probe>,
    fail_configure: bool,
    panic_configure: bool,
    fail_process: bool,
}

impl TestModule {
    pub(crate) fn new(probe: Arc<Probe>) -> Self {
        Self {
            probe,
            fail_configure: false,
            panic_configure: false,
            fail_process: false,
        }
    }

    pub(crate) fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub(crate) fn panicking_configure(mut self) -> Self {
        self.panic_configure = true;
        self
    }

    pub(crate) fn failing_process(mut self) -> Self {
        self.fail_process = true;
        self
    }
}

impl Module for TestModule {
    fn command_specs(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("echo").optional("text"),
            CommandSpec::new("greet").required("name").optional("greeting"),
            CommandSpec::new("fail"),
            CommandSpec::new("info"),
            CommandSpec::new("panic"),
            CommandSpec::new("call_self"),
            CommandSpec::new("push_self"),
            CommandSpec::new("call").required("to"),
            CommandSpec::new("slow").required("ms"),
        ]
    }

    async fn configure(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.probe.configured.fetch_add(1, Ordering::SeqCst);
        if self.panic_configure {
            panic!("configure exploded");
        }
        if self.fail_configure {
            bail!("device not found");
        }
        Ok(())
    }

    async fn on_start(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.probe.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn custom_process(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.probe.ticks.fetch_add(1, Ordering::SeqCst);
        if self.fail_process {
            bail!("tick failed");
        }
        Ok(())
    }

    async fn on_event(&self, event: &Event, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.probe.events.lock().unwrap().push(event.name.clone());
        match event.name.as_str() {
            "fail" => bail!("event handler failed"),
            "panic" => panic!("event handler exploded"),
            _ => Ok(()),
        }
    }

    async fn handle_command(
        &self,
        name: &str,
        args: CommandArgs,
        ctx: &ModuleContext,
    ) -> Result<Value, CommandError> {
        self.probe.commands.lock().unwrap().push(name.to_string());
        match name {
            "echo" => Ok(json!({
                "text": args.get("text").cloned().unwrap_or(Value::Null),
                "sender": args.sender(),
            })),
            "greet" => {
                let greeting = args
                    .opt::<String>("greeting")?
                    .unwrap_or_else(|| "hello".to_string());
                Ok(json!(format!("{greeting} {}", args.str("name")?)))
            }
            "fail" => Err(CommandError::failure("boom")),
            "info" => Err(CommandError::info("nothing to do")),
            "panic" => panic!("handler exploded"),
            "call_self" => {
                let mut params = Params::new();
                params.insert("text".into(), json!("inner"));
                let response = ctx
                    .send_command(ctx.id().clone(), "echo", params, Duration::from_secs(1))
                    .await?;
                Ok(response.data)
            }
            "push_self" => {
                let command = Command::new("echo", ctx.id())
                    .to(ctx.id().clone())
                    .param("text", "raw");
                let response = ctx.push(command, Duration::from_secs(1)).await?;
                Ok(response.unwrap_or_default().data)
            }
            "call" => {
                let to = args.str("to")?.to_string();
                let mut params = Params::new();
                params.insert("text".into(), json!("relay"));
                let response = ctx
                    .send_command(to, "echo", params, Duration::from_secs(2))
                    .await?;
                Ok(response.data)
            }
            "slow" => {
                let ms = args.value::<u64>("ms")?;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }
            other => Err(CommandError::failure(format!("unscripted command {other}"))),
        }
    }

    async fn on_stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.probe.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
