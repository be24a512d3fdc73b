//! Two scripted players fighting a full match in one process.
//!
//! Both peers run over one in-memory hub, optionally behind a fault-injecting
//! channel, and go through the same steps a real client does: lobby presence,
//! the seed handshake, then 60 Hz ticks until one side runs out of lives.
//!
//! ```text
//! cargo run --example local_match -- --loss 0.1 --reorder 0.3 --realtime
//! ```

use std::sync::Arc;

use clap::Parser;
use quickdraw_sync::clock::SystemClock;
use quickdraw_sync::rng::{Pcg32, Rng, SeedableRng};
use quickdraw_sync::{
    CancelSignal, ChaosChannel, ChaosConfig, Config, HandshakeConfig, InMemoryDirectory,
    LoopbackChannel, MatchEvent, MatchStatus, NetMatch, PeerLink, PresenceConfig, PresenceEvent,
    PresenceService, Role, RoundRules,
};
use tracing::{info, warn};
use web_time::Duration;

const FPS: u64 = 60;

struct Demo;

impl Config for Demo {
    type Identity = String;
}

type DemoChannel = ChaosChannel<String, LoopbackChannel<String>>;

#[derive(Parser)]
struct Opt {
    /// Send loss rate applied on both sides.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Duplication rate applied on both sides.
    #[arg(long, default_value_t = 0.0)]
    duplication: f64,
    /// Reorder rate applied on both sides.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Seed for fault injection and the players' reaction times.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Mean reaction of the first player, in frames.
    #[arg(long, default_value_t = 14)]
    host_reaction: u32,
    /// Mean reaction of the second player, in frames.
    #[arg(long, default_value_t = 16)]
    guest_reaction: u32,
    /// Chance a player jumps the gun each round.
    #[arg(long, default_value_t = 0.1)]
    false_start: f64,
    /// Sleep between ticks instead of running flat out.
    #[arg(long)]
    realtime: bool,
}

/// Picks the frame a scripted player presses on.
struct Bot {
    rng: Pcg32,
    reaction: u32,
    false_start: f64,
}

impl Bot {
    fn press_frame(&mut self, signal: i32) -> i32 {
        if self.rng.gen_bool(self.false_start) {
            let early = self.rng.gen_range(1..30) as i32;
            return (signal - early).max(0);
        }
        let spread = self.reaction / 2 + 1;
        signal + (self.reaction - self.reaction / 4 + self.rng.gen_range(0..spread)) as i32
    }
}

fn chaos(opt: &Opt, salt: u64) -> ChaosConfig {
    ChaosConfig::builder()
        .send_loss_rate(opt.loss)
        .duplication_rate(opt.duplication)
        .reorder_rate(opt.reorder)
        .seed(opt.seed.wrapping_add(salt))
        .build()
}

async fn lobby(
    directory: &Arc<InMemoryDirectory<String>>,
) -> Result<(), Box<dyn std::error::Error>> {
    directory.join("host".to_owned());
    directory.join("guest".to_owned());
    let (mut host, mut events) = PresenceService::<Demo, _>::new(
        "host".to_owned(),
        Arc::clone(directory),
        PresenceConfig::default(),
        Arc::new(SystemClock),
    )?;
    let (mut guest, _guest_events) = PresenceService::<Demo, _>::new(
        "guest".to_owned(),
        Arc::clone(directory),
        PresenceConfig::default(),
        Arc::new(SystemClock),
    )?;
    host.enter()?;
    guest.enter()?;
    host.set_ready(true)?;
    guest.set_ready(true)?;

    while !host.with_tracker(|t| t.all_ready()) {
        match tokio::time::timeout(Duration::from_secs(3), events.recv()).await {
            Ok(Some(PresenceEvent::ReadyChanged { member, ready })) => {
                info!("lobby: {} ready = {}", member, ready);
            },
            Ok(Some(event)) => info!("lobby: {:?}", event),
            Ok(None) | Err(_) => break,
        }
    }
    host.exit();
    guest.exit();
    Ok(())
}

type DemoLink = PeerLink<Demo, DemoChannel>;

async fn connect(opt: &Opt) -> Result<(DemoLink, DemoLink), Box<dyn std::error::Error>> {
    let (a, b) = LoopbackChannel::pair();
    let config = HandshakeConfig::lossy();
    let host_channel = ChaosChannel::new(a, chaos(opt, 1));
    let guest_channel = ChaosChannel::new(b, chaos(opt, 2));
    let mut host = PeerLink::<Demo, _>::new("host".to_owned(), host_channel, config.clone())?;
    let mut guest = PeerLink::<Demo, _>::new("guest".to_owned(), guest_channel, config)?;
    let cancel = CancelSignal::new();
    let poll = Duration::from_millis(16);

    let (host_seed, guest_seed) = tokio::join!(
        host.connect(Role::Initiator, "guest".to_owned(), poll, &cancel),
        guest.connect(Role::Responder, "host".to_owned(), poll, &cancel),
    );
    info!("handshake done: host {:?}, guest {:?}", host_seed, guest_seed);
    host_seed?;
    guest_seed?;
    Ok((host, guest))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(tracing::Level::INFO)
            .finish(),
    )?;
    let opt = Opt::parse();

    lobby(&Arc::new(InMemoryDirectory::new())).await?;
    let (host, guest) = connect(&opt).await?;

    let mut host = NetMatch::new(host, RoundRules::default())?;
    let mut guest = NetMatch::new(guest, RoundRules::default())?;
    let mut host_bot = Bot {
        rng: Pcg32::seed_from_u64(opt.seed),
        reaction: opt.host_reaction,
        false_start: opt.false_start,
    };
    let mut guest_bot = Bot {
        rng: Pcg32::seed_from_u64(opt.seed.wrapping_mul(31)),
        reaction: opt.guest_reaction,
        false_start: opt.false_start,
    };
    let mut ticker = tokio::time::interval(Duration::from_micros(1_000_000 / FPS));

    loop {
        let signal = host.engine().signal_frame().as_i32();
        let host_press = host_bot.press_frame(signal);
        let guest_press = guest_bot.press_frame(signal);
        info!(
            "round {}: signal at {}, host presses at {}, guest at {}",
            host.engine().round_count() + 1,
            signal,
            host_press,
            guest_press
        );

        let mut host_done = false;
        let mut guest_done = false;
        while !(host_done && guest_done) {
            if opt.realtime {
                ticker.tick().await;
            }
            if !host_done {
                let frame = host.frame().as_i32();
                host_done = host.tick(frame == host_press)?.settled.is_some();
            }
            if !guest_done {
                let frame = guest.frame().as_i32();
                guest_done = guest.tick(frame == guest_press)?.settled.is_some();
            }
        }

        for event in host.events() {
            match event {
                MatchEvent::RoundSettled(result) => info!(
                    "host sees {} (local {:?}, remote {:?})",
                    result.outcome, result.local, result.remote
                ),
                MatchEvent::MatchFinished(winner) => info!("match over: {:?}", winner),
                _ => {},
            }
        }
        if let (Some(h), Some(g)) = (host.check_result(), guest.check_result()) {
            if g.outcome != h.outcome.mirrored() {
                warn!("peers disagree: host {}, guest {}", h.outcome, g.outcome);
            }
        }
        guest.events().for_each(drop);

        if host.check_match_result() != MatchStatus::Continue
            || guest.check_match_result() != MatchStatus::Continue
        {
            break;
        }
        host.on_round_reset()?;
        guest.on_round_reset()?;
    }

    let lives = host.engine().lives();
    info!(
        "final lives: host {}, guest {} after {} rounds",
        lives.local,
        lives.remote,
        host.engine().round_count()
    );
    Ok(())
}
