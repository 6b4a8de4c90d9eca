//! Collectives built from point-to-point messages.
//!
//! Every rank sends its contribution to every other rank and folds the results
//! in rank order, so all ranks compute bit-identical answers. All ranks must
//! call the same collectives in the same order; delivery is FIFO per tag, so a
//! fixed tag per collective is enough to keep successive calls apart.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{Wire, cast_slice, decode_vec};
use crate::da_error::DaError;

pub const ALL_GATHER_TAG: CommTag = CommTag(0x3600);
pub const ALL_REDUCE_TAG: CommTag = CommTag(0x3610);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    /// Neutral starting value of the fold.
    pub fn identity(self) -> f64 {
        match self {
            ReduceOp::Sum => 0.0,
            ReduceOp::Max => f64::NEG_INFINITY,
            ReduceOp::Min => f64::INFINITY,
        }
    }

    pub fn fold(self, acc: f64, x: f64) -> f64 {
        match self {
            ReduceOp::Sum => acc + x,
            ReduceOp::Max => acc.max(x),
            ReduceOp::Min => acc.min(x),
        }
    }
}

/// Gather `mine` from every rank; entry `r` of the result is rank `r`'s slice.
///
/// Every rank must contribute the same number of elements.
pub fn all_gather<C, T>(comm: &C, tag: CommTag, mine: &[T]) -> Result<Vec<Vec<T>>, DaError>
where
    C: Communicator,
    T: Wire,
{
    let (me, size) = (comm.rank(), comm.size());
    let nbytes = std::mem::size_of_val(mine);

    let mut recvs = Vec::with_capacity(size.saturating_sub(1));
    for peer in (0..size).filter(|&p| p != me) {
        let mut scratch = vec![0u8; nbytes];
        recvs.push((peer, comm.irecv(peer, tag.as_u16(), &mut scratch)));
    }
    let sends: Vec<_> = (0..size)
        .filter(|&p| p != me)
        .map(|peer| comm.isend(peer, tag.as_u16(), cast_slice(mine)))
        .collect();

    let mut out: Vec<Vec<T>> = vec![Vec::new(); size];
    out[me] = mine.to_vec();
    let mut maybe_err = None;
    for (peer, h) in recvs {
        match h.wait() {
            Some(raw) if raw.len() == nbytes => match decode_vec(&raw) {
                Some(values) => out[peer] = values,
                None if maybe_err.is_none() => {
                    maybe_err = Some(DaError::CommError {
                        neighbor: peer,
                        message: "all-gather payload cannot be decoded".into(),
                    });
                }
                None => {}
            },
            Some(raw) if maybe_err.is_none() => {
                maybe_err = Some(DaError::BufferSizeMismatch {
                    neighbor: peer,
                    expected: nbytes,
                    got: raw.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(DaError::CommError {
                    neighbor: peer,
                    message: format!("failed to receive all-gather payload from rank {peer}"),
                });
            }
            _ => {}
        }
    }
    for send in sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Element-wise reduction of `local` over all ranks.
pub fn all_reduce<C: Communicator>(
    comm: &C,
    local: &[f64],
    op: ReduceOp,
) -> Result<Vec<f64>, DaError> {
    let parts = all_gather(comm, ALL_REDUCE_TAG, local)?;
    let mut acc = parts[0].clone();
    for part in &parts[1..] {
        for (a, &x) in acc.iter_mut().zip(part) {
            *a = op.fold(*a, x);
        }
    }
    Ok(acc)
}

/// Scalar convenience wrapper around [`all_reduce`].
pub fn all_reduce_scalar<C: Communicator>(
    comm: &C,
    local: f64,
    op: ReduceOp,
) -> Result<f64, DaError> {
    Ok(all_reduce(comm, &[local], op)?[0])
}
