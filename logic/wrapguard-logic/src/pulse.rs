use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;
use wrapguard_core::DoCommand;

const PULSE_WIDTH: Duration = Duration::from_millis(300);

/// Writes a coil ON, then schedules the OFF write independently of the
/// calling task so it still lands even if the caller's loop iteration ends
/// or the stage is mid-teardown (§9, "pulse as explicit scoped resource").
pub fn fire(do_tx: &mpsc::Sender<DoCommand>, addr: u16) {
    if do_tx.try_send(DoCommand { addr, value: true }).is_err() {
        warn!(addr, "dropped pulse ON write, DO command queue is full");
        return;
    }
    let off_tx = do_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(PULSE_WIDTH).await;
        if off_tx.send(DoCommand { addr, value: false }).await.is_err() {
            warn!(addr, "could not deliver pulse OFF write, receiver is gone");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test(start_paused = true)]
    async fn fires_on_then_off_after_the_pulse_width() {
        let (tx, mut rx) = mpsc::channel(4);
        fire(&tx, 0);

        let on = rx.recv().await.unwrap();
        assert_eq!(on, DoCommand { addr: 0, value: true });

        tokio::time::advance(PULSE_WIDTH + Duration::from_millis(10)).await;
        let off = rx.recv().await.unwrap();
        assert_eq!(off, DoCommand { addr: 0, value: false });
    }

    proptest! {
        /// Invariant: whatever coil address is pulsed, `fire` always writes
        /// ON immediately and exactly one OFF to the same address, landing
        /// no sooner than `PULSE_WIDTH` later — for the full `u16` address
        /// space, not just address 0.
        #[test]
        fn pulse_is_always_on_then_matching_off(addr in any::<u16>()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();
            let (on, before_width, off) = rt.block_on(async {
                let (tx, mut rx) = mpsc::channel(4);
                fire(&tx, addr);
                let on = rx.recv().await.unwrap();
                let before_width = rx.try_recv().is_err();
                tokio::time::advance(PULSE_WIDTH + Duration::from_millis(10)).await;
                let off = rx.recv().await.unwrap();
                (on, before_width, off)
            });
            prop_assert_eq!(on, DoCommand { addr, value: true });
            prop_assert!(before_width, "OFF must not land before the pulse width elapses");
            prop_assert_eq!(off, DoCommand { addr, value: false });
        }
    }
}
