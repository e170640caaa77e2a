//! The diffusion controller (C5): a pure function from (local queue, peer
//! queue) to an offload weight. Invoked under the peer registry's write lock
//! every time fresh feedback arrives from a peer.

/// `w = max(0, round(kappa * (local_queue - peer_queue)))`
///
/// A peer at or above the local queue depth contributes zero weight — this
/// is what stops two symmetric neighbors from perpetually offloading to each
/// other.
pub fn diffusion_weight(kappa: f64, local_queue: i64, peer_queue: i64) -> i64 {
    let diff = (local_queue - peer_queue) as f64;
    let weight = (kappa * diff).round();
    if weight <= 0.0 {
        0
    } else {
        weight as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn zero_when_peer_not_behind() {
        assert_eq!(diffusion_weight(0.5, 10, 10), 0);
        assert_eq!(diffusion_weight(0.5, 10, 20), 0);
    }

    #[test]
    fn rounds_half_up_excess() {
        // kappa * diff = 0.5 * 3 = 1.5 -> rounds to 2
        assert_eq!(diffusion_weight(0.5, 13, 10), 2);
    }

    #[test]
    fn kappa_zero_is_always_zero() {
        assert_eq!(diffusion_weight(0.0, 1000, 0), 0);
    }

    #[quickcheck]
    fn weight_never_negative(kappa_milli: u16, local: i32, peer: i32) -> bool {
        let kappa = (kappa_milli % 1001) as f64 / 1000.0; // clamp to [0, 1]
        diffusion_weight(kappa, local as i64, peer as i64) >= 0
    }

    #[quickcheck]
    fn weight_law_matches_formula(kappa_milli: u16, local: i16, peer: i16) -> bool {
        let kappa = (kappa_milli % 1001) as f64 / 1000.0;
        let local = local as i64;
        let peer = peer as i64;
        let expected = {
            let diff = (local - peer) as f64;
            let w = (kappa * diff).round();
            if w <= 0.0 {
                0
            } else {
                w as i64
            }
        };
        diffusion_weight(kappa, local, peer) == expected
    }
}
