use crate::config::LoopSetting;
use crate::dispatcher::Dispatcher;
use crate::output::{ChannelData, Dispatched};
use crate::prelude::*;
use crate::trigger::Trigger;

use std::time::{Duration, Instant};
use tokio::sync::{broadcast::error::TryRecvError, mpsc};

/// Sleep between passes, and the granularity of the loop wait.
const PASS_SLEEP: Duration = Duration::from_millis(500);

/// Capacity of each device's adhoc queue.
pub const ADHOC_QUEUE: usize = 64;

struct ScheduledCommand {
    command: String,
    trigger: Trigger,
    outputs: Vec<config::Output>,
}

/// The dispatch loop of one device. Owns the device's port, so commands
/// against that device never overlap.
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
    dispatcher: Dispatcher,
    commands: Vec<ScheduledCommand>,
    adhoc: mpsc::Receiver<String>,
    /// latched once shutdown has been seen, the signal itself is consumed
    stopped: bool,
}

impl Scheduler {
    pub fn new(
        config: ConfigWrapper,
        channels: Channels,
        device: &config::Device,
        dispatcher: Dispatcher,
        adhoc: mpsc::Receiver<String>,
    ) -> Result<Self> {
        let mut commands = Vec::new();
        for command in device.commands() {
            let kind = command.trigger()?;
            info!("{}: scheduling {} {}", device.name(), command.command(), kind);
            commands.push(ScheduledCommand {
                command: command.command().to_owned(),
                trigger: Trigger::new(kind),
                outputs: command.outputs(),
            });
        }

        Ok(Self {
            config,
            channels,
            dispatcher,
            commands,
            adhoc,
            stopped: false,
        })
    }

    /// Binds the device's protocol and builds its port.
    pub fn from_config(
        config: &ConfigWrapper,
        channels: &Channels,
        device: &config::Device,
        adhoc: mpsc::Receiver<String>,
    ) -> Result<Self> {
        let protocol = Protocol::new(device.port().protocol(), device.model())?;
        let port = port::from_config(device, config, channels);
        let dispatcher = Dispatcher::new(device.name(), protocol, port);
        Self::new(config.clone(), channels.clone(), device, dispatcher, adhoc)
    }

    pub fn device(&self) -> &str {
        self.dispatcher.device()
    }

    pub async fn start(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let loop_setting = self.config.loop_setting();
        info!("{}: scheduler starting, loop {}", self.device(), loop_setting);

        if let Err(err) = self.dispatcher.connect().await {
            // each dispatch retries the connection
            warn!("{}: {}", self.device(), err);
        }

        loop {
            let started = Instant::now();
            let ran = self.run_pass(&mut shutdown).await;
            debug!("{}: pass ran {} commands in {:?}", self.device(), ran, started.elapsed());

            if self.stopping(&mut shutdown) {
                info!("{}: shutdown requested", self.device());
                break;
            }

            let period = match loop_setting {
                LoopSetting::Once => break,
                LoopSetting::Every(seconds) => Duration::from_secs(seconds),
            };

            // at least one short sleep, then the rest of the loop period
            let mut first = true;
            while first || started.elapsed() < period {
                first = false;
                let wait = period.saturating_sub(started.elapsed()).clamp(Duration::ZERO, PASS_SLEEP);
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("{}: shutdown requested", self.device());
                        self.dispatcher.disconnect().await;
                        return Ok(());
                    }
                    _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                }
            }
        }

        self.dispatcher.disconnect().await;
        info!("{}: scheduler finished", self.device());
        Ok(())
    }

    /// One pass: every queued adhoc command, then each due scheduled command
    /// in configured order. Returns how many commands were dispatched.
    pub async fn run_pass(&mut self, shutdown: &mut broadcast::Receiver<()>) -> usize {
        let mut ran = 0;

        while let Ok(code) = self.adhoc.try_recv() {
            info!("{}: running adhoc command {}", self.device(), code);
            let result = self.dispatcher.run_command(&code).await;
            let outputs = self.adhoc_outputs(&code);
            self.publish(result, outputs, true);
            ran += 1;
        }

        for i in 0..self.commands.len() {
            if self.stopping(shutdown) {
                break;
            }
            if !self.commands[i].trigger.is_due() {
                continue;
            }

            let code = self.commands[i].command.clone();
            let result = self.dispatcher.run_command(&code).await;
            self.commands[i].trigger.touch();
            debug!("{}: {} {}", self.device(), code, self.commands[i].trigger);

            let outputs = self.commands[i].outputs.clone();
            self.publish(result, outputs, false);
            ran += 1;
        }

        ran
    }

    // an adhoc command goes where the scheduled command of the same name goes
    fn adhoc_outputs(&self, code: &str) -> Vec<config::Output> {
        self.commands
            .iter()
            .find(|c| c.command.eq_ignore_ascii_case(code))
            .map(|c| c.outputs.clone())
            .unwrap_or_else(|| vec![config::Output::default()])
    }

    fn publish(&self, result: CommandResult, outputs: Vec<config::Output>, adhoc: bool) {
        let dispatched = Dispatched {
            device: self.device().to_owned(),
            adhoc,
            outputs,
            result,
        };
        if self
            .channels
            .to_outputs
            .send(ChannelData::Result(Box::new(dispatched)))
            .is_err()
        {
            warn!("{}: no outputs listening, result dropped", self.device());
        }
    }

    fn stopping(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        if !self.stopped {
            self.stopped = matches!(
                shutdown.try_recv(),
                Ok(()) | Err(TryRecvError::Closed) | Err(TryRecvError::Lagged(_))
            );
        }
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(yaml: &str) -> Result<(ConfigWrapper, config::Device)> {
        let config = ConfigWrapper::from_config(Config::from_str(yaml)?);
        let device = config
            .devices()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no device"))?;
        Ok((config, device))
    }

    fn results(receiver: &mut output::Receiver) -> Vec<Dispatched> {
        let mut results = Vec::new();
        while let Ok(ChannelData::Result(dispatched)) = receiver.try_recv() {
            results.push(*dispatched);
        }
        results
    }

    #[tokio::test]
    async fn pass_runs_due_commands_in_order() -> Result<()> {
        let (config, device) = device(
            "loop: once\ndevice: {port: {type: test}}\ncommands:\n  - command: QPI\n  - command: QMN\n    trigger: {disabled: true}\n  - command: QFLAG\n    trigger: {loops: 2}\n",
        )?;
        let channels = Channels::new();
        let mut receiver = channels.to_outputs.subscribe();
        let (_tx, rx) = mpsc::channel(ADHOC_QUEUE);
        let (_shutdown_tx, mut shutdown) = broadcast::channel(1);

        let mut scheduler = Scheduler::from_config(&config, &channels, &device, rx)?;
        assert_eq!(scheduler.run_pass(&mut shutdown).await, 2);

        let results = results(&mut receiver);
        let commands: Vec<&str> = results.iter().map(|d| d.result.command.as_str()).collect();
        assert_eq!(commands, vec!["QPI", "QFLAG"]);
        assert!(!results[0].adhoc);
        assert_eq!(results[0].result.get("protocol_id").map(|r| r.value.to_string()), Some("PI30".to_string()));

        // QPI waits 60s, QFLAG every second pass
        assert_eq!(scheduler.run_pass(&mut shutdown).await, 0);
        assert_eq!(scheduler.run_pass(&mut shutdown).await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn adhoc_runs_first() -> Result<()> {
        let (config, device) = device(
            "device: {name: inv, port: {type: test}}\ncommands:\n  - command: QPI\n    outputs: [{type: screen, format: json}]\n",
        )?;
        let channels = Channels::new();
        let mut receiver = channels.to_outputs.subscribe();
        let (tx, rx) = mpsc::channel(ADHOC_QUEUE);
        let (_shutdown_tx, mut shutdown) = broadcast::channel(1);

        let mut scheduler = Scheduler::from_config(&config, &channels, &device, rx)?;
        tx.send("QFLAG".to_string()).await?;
        tx.send("qpi".to_string()).await?;

        assert_eq!(scheduler.run_pass(&mut shutdown).await, 3);
        let results = results(&mut receiver);
        assert_eq!(results.len(), 3);
        assert!(results[0].adhoc && results[1].adhoc && !results[2].adhoc);
        assert_eq!(results[0].result.command, "QFLAG");
        assert_eq!(results[0].outputs[0].format(), output::FormatKind::Simple);
        assert_eq!(results[1].outputs[0].format(), output::FormatKind::Json);
        assert_eq!(results[2].device, "inv");

        // queue drained
        assert_eq!(scheduler.run_pass(&mut shutdown).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn once_loop_exits_after_one_pass() -> Result<()> {
        let (config, device) = device("loop: 0\ndevice: {port: {type: test}}\ncommands: [{command: QPI}]")?;
        let channels = Channels::new();
        let mut receiver = channels.to_outputs.subscribe();
        let (_tx, rx) = mpsc::channel(ADHOC_QUEUE);
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        Scheduler::from_config(&config, &channels, &device, rx)?
            .start(shutdown)
            .await?;
        assert_eq!(results(&mut receiver).len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_stops_loop() -> Result<()> {
        let (config, device) = device("loop: 3600\ndevice: {port: {type: test}}\ncommands: [{command: QPI}]")?;
        let channels = Channels::new();
        let _receiver = channels.to_outputs.subscribe();
        let (_tx, rx) = mpsc::channel(ADHOC_QUEUE);
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        let task = tokio::spawn(Scheduler::from_config(&config, &channels, &device, rx)?.start(shutdown));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(())?;

        tokio::time::timeout(Duration::from_secs(5), task).await???;
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_seen_during_pass_ends_the_loop() -> Result<()> {
        let (config, device) = device(
            "loop: 3600\ndevice: {port: {type: test}}\ncommands: [{command: QPI}, {command: QMN}]",
        )?;
        let channels = Channels::new();
        let mut receiver = channels.to_outputs.subscribe();
        let (_tx, rx) = mpsc::channel(ADHOC_QUEUE);
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        // already pending when the first pass starts
        shutdown_tx.send(())?;
        let task = tokio::spawn(Scheduler::from_config(&config, &channels, &device, rx)?.start(shutdown));

        tokio::time::timeout(Duration::from_secs(3), task).await???;
        assert!(results(&mut receiver).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn bad_trigger_is_rejected() -> Result<()> {
        let (config, mut device) = device("device: {port: {type: test}}\ncommands: [{command: QPI}]")?;
        device.commands[0].trigger = Some(config::Trigger {
            loops: Some(0),
            ..Default::default()
        });
        let (_tx, rx) = mpsc::channel(ADHOC_QUEUE);
        assert!(Scheduler::from_config(&config, &Channels::new(), &device, rx).is_err());
        Ok(())
    }
}
