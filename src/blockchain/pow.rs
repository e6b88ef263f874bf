use log::debug;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Every proof must be a multiple of this
pub const PROOF_MODULUS: u64 = 9;

/// How many candidates are tried between cancellation checks
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Errors that can occur while searching for a proof
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("No proof exists for last proof {0}")]
    Unsolvable(u64),
}

/// Checks a proof against the previous block's proof.
///
/// A proof is valid when it divides `last_proof` and is a multiple of
/// [`PROOF_MODULUS`]. Zero is never a valid proof.
pub fn verify(last_proof: u64, proof: u64) -> bool {
    proof != 0 && last_proof % proof == 0 && proof % PROOF_MODULUS == 0
}

/// Finds the smallest valid proof for `last_proof`, blocking until done
pub fn solve(last_proof: u64) -> Result<u64, WorkError> {
    match solve_cancellable(last_proof, &CancellationToken::new())? {
        Some(proof) => Ok(proof),
        None => Err(WorkError::Unsolvable(last_proof)),
    }
}

/// Finds the smallest valid proof, giving up once `token` is cancelled.
///
/// Returns `Ok(None)` when cancelled. Any valid proof for a non-zero
/// `last_proof` divides it, so the search stops there; a zero `last_proof`
/// is divisible by everything.
pub fn solve_cancellable(last_proof: u64, token: &CancellationToken) -> Result<Option<u64>, WorkError> {
    let upper = if last_proof == 0 { u64::MAX } else { last_proof };

    let mut proof = 1u64;
    loop {
        if proof % CANCEL_CHECK_INTERVAL == 0 && token.is_cancelled() {
            debug!("Proof search for {} cancelled at {}", last_proof, proof);
            return Ok(None);
        }

        if verify(last_proof, proof) {
            debug!("Found proof {} for last proof {}", proof, last_proof);
            return Ok(Some(proof));
        }

        if proof >= upper {
            return Err(WorkError::Unsolvable(last_proof));
        }
        proof += 1;
    }
}
