use crate::{clock::Time, device::Device, internet::DeviceId, link::PortId};
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// One end of a [`Wire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attachment {
    pub device: DeviceId,
    pub port: PortId,
}

/// A full-duplex point-to-point link between two device ports.
///
/// Frames queued on either end are delivered to the other end the next time
/// the internetwork ticks. A wire can optionally drop frames at random, which
/// is useful for exercising retransmission.
#[derive(Debug, Clone)]
pub struct Wire {
    ends: [Attachment; 2],
    loss: Option<Loss>,
}

#[derive(Debug, Clone)]
struct Loss {
    rate: f64,
    rng: SmallRng,
}

impl Wire {
    /// Creates a lossless wire.
    pub fn new(a: Attachment, b: Attachment) -> Self {
        Self {
            ends: [a, b],
            loss: None,
        }
    }

    /// Makes the wire drop each frame with probability `rate`. The seed keeps
    /// runs reproducible.
    pub fn loss_rate(mut self, rate: f64, seed: u64) -> Self {
        self.loss = Some(Loss {
            rate: rate.clamp(0.0, 1.0),
            rng: SmallRng::seed_from_u64(seed),
        });
        self
    }

    pub fn ends(&self) -> [Attachment; 2] {
        self.ends
    }

    /// Moves every frame queued at either end to the opposite end, stamping
    /// them with `now`.
    pub(crate) fn transfer(&mut self, devices: &mut [Device], now: Time) {
        let [a, b] = self.ends;
        for (from, to) in [(a, b), (b, a)] {
            let outgoing = match devices
                .get_mut(from.device.0)
                .map(|device| device.take_outgoing(from.port))
            {
                Some(outgoing) => outgoing,
                None => continue,
            };
            for packet in outgoing {
                if self.drops() {
                    tracing::trace!(from = ?from, to = ?to, "wire dropped frame");
                    continue;
                }
                if let Some(device) = devices.get_mut(to.device.0) {
                    device.deliver(to.port, packet, now);
                }
            }
        }
    }

    fn drops(&mut self) -> bool {
        match &mut self.loss {
            Some(loss) => loss.rng.gen_bool(loss.rate),
            None => false,
        }
    }
}
