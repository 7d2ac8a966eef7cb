use expansion_can::{Buffer, Pool};
use std::sync::Barrier;
use std::thread;

#[test]
fn concurrent_allocation_respects_capacity() {
    const C: usize = 4;
    let pool = Pool::<C>::new();

    for _ in 0..50 {
        let start = &Barrier::new(C + 1);
        let pool = &pool;
        let results: Vec<Option<Buffer<'_, C>>> = thread::scope(|s| {
            let handles: Vec<_> = (0..=C)
                .map(|_| {
                    s.spawn(move || {
                        start.wait();
                        pool.allocate()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let granted: Vec<&Buffer<'_, C>> = results.iter().flatten().collect();
        assert_eq!(granted.len(), C);
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        for (i, a) in granted.iter().enumerate() {
            assert!(granted[i + 1..].iter().all(|b| b.slot() != a.slot()));
        }
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.held(), C);

        drop(results);
        assert_eq!(pool.available(), C);
        assert_eq!(pool.held(), 0);
    }
}
