//! Thread-per-rank driver for in-process collective tests.

use std::thread;

use crate::distributed::ChannelMesh;

/// Run one closure per rank, each on its own thread over a fresh
/// [`ChannelMesh`], and return the per-rank results indexed by rank.
///
/// # Panics
/// Propagates a panic from any rank thread.
pub fn run_ranks<T, F>(world_size: usize, f: F) -> Vec<T>
where
    F: Fn(ChannelMesh) -> T + Clone + Send + 'static,
    T: Send + 'static,
{
    let handles: Vec<_> = ChannelMesh::mesh(world_size)
        .into_iter()
        .map(|mesh| {
            let f = f.clone();
            thread::spawn(move || f(mesh))
        })
        .collect();

    handles
        .into_iter()
        .map(|handle| handle.join().expect("rank thread panicked"))
        .collect()
}
