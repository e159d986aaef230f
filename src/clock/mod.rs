//! Logical-clock peer simulation: three peers at independent clock
//! rates exchanging timestamped messages and advancing Lamport
//! counters.

pub mod message;
pub mod peer;

pub use message::ClockMessage;
pub use peer::Peer;

/// Wires three peers into a full triangle of point-to-point channels
/// and runs them concurrently for `duration`.
///
/// `seed` drives every peer's clock-rate pick and random event rolls:
/// the same seed always reproduces the same run, per §8 S7 ("run three
/// peers … with a deterministic RNG seed"). Each peer gets its own
/// sub-seed drawn from a `seed`-seeded `StdRng` rather than sharing one
/// stream across peers, so the peers' rolls don't lock-step together.
pub async fn run_simulation(duration: std::time::Duration, seed: u64) {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio::sync::mpsc;

    let mut seed_rng = StdRng::seed_from_u64(seed);
    let peer_seeds: [u64; 3] = [seed_rng.gen(), seed_rng.gen(), seed_rng.gen()];

    let (tx01, rx01) = mpsc::unbounded_channel();
    let (tx02, rx02) = mpsc::unbounded_channel();
    let (tx10, rx10) = mpsc::unbounded_channel();
    let (tx12, rx12) = mpsc::unbounded_channel();
    let (tx20, rx20) = mpsc::unbounded_channel();
    let (tx21, rx21) = mpsc::unbounded_channel();

    let peer0 = Peer::new(0, [1, 2], [tx01, tx02], peer_seeds[0]);
    let peer1 = Peer::new(1, [0, 2], [tx10, tx12], peer_seeds[1]);
    let peer2 = Peer::new(2, [0, 1], [tx20, tx21], peer_seeds[2]);

    let h0 = tokio::spawn(peer0.run([rx10, rx20], duration));
    let h1 = tokio::spawn(peer1.run([rx01, rx21], duration));
    let h2 = tokio::spawn(peer2.run([rx02, rx12], duration));

    let _ = tokio::join!(h0, h1, h2);
}
