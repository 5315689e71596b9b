use anyhow::Result;
use autoinc::store::*;
use autoinc::{item, ErrorKind, HistoryAllocator, Item, Value};
use autoinc_tests::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use test_log::test;

const N: i64 = 20;

#[test(tokio::test)]
async fn versions_an_existing_item() -> Result<()> {
    let db = memory_store()?;
    db.put(ConditionalPut::new(
        WIDGET_TABLE,
        item! { "widgetID" => 1, "widgetName" => "runcible spoon", "color" => "silver" },
    ))
    .await?;

    let alloc = HistoryAllocator::new(db.clone(), history_config(1));
    let v = alloc.allocate(item! { "widgetName" => "spork" }).await?;
    assert_eq!(v, 2);

    let owner = item! {
        "widgetID" => 1,
        "widgetName" => "spork",
        "color" => "silver",
        "version" => 2,
    };
    assert_eq!(scan(db.as_ref(), WIDGET_TABLE).await?, vec![owner.clone()]);
    assert_eq!(scan(db.as_ref(), HISTORY_TABLE).await?, vec![owner]);
    assert_eq!(alloc.last_version().await?, Some(2));
    Ok(())
}

#[test(tokio::test)]
async fn each_update_appends_one_snapshot() -> Result<()> {
    let db = memory_store()?;
    let alloc = HistoryAllocator::new(db.clone(), history_config(1));

    for name in ["fork", "knife", "spoon"] {
        alloc.allocate(item! { "widgetName" => name }).await?;
    }

    let history = alloc.history().await?;
    assert_eq!(
        history,
        vec![
            item! { "widgetID" => 1, "widgetName" => "fork", "version" => 2 },
            item! { "widgetID" => 1, "widgetName" => "knife", "version" => 3 },
            item! { "widgetID" => 1, "widgetName" => "spoon", "version" => 4 },
        ]
    );
    assert_eq!(alloc.get().await?.as_ref(), history.last());
    Ok(())
}

#[test(tokio::test)]
async fn supplied_version_is_discarded() -> Result<()> {
    let db = memory_store()?;
    db.put(ConditionalPut::new(
        WIDGET_TABLE,
        item! { "widgetID" => 1, "version" => 5 },
    ))
    .await?;

    let alloc = HistoryAllocator::new(db.clone(), history_config(1));
    let v = alloc
        .allocate(item! { "version" => 100, "widgetName" => "spoon" })
        .await?;
    assert_eq!(v, 6);

    let history = alloc.history().await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["version"], Value::Int(6));
    assert_eq!(alloc.last_version().await?, Some(6));
    Ok(())
}

#[test(tokio::test)]
async fn histories_are_per_owner() -> Result<()> {
    let db = memory_store()?;
    let a = HistoryAllocator::new(db.clone(), history_config(1));
    let b = HistoryAllocator::new(db.clone(), history_config(2));

    assert_eq!(a.allocate(Item::new()).await?, 2);
    assert_eq!(a.allocate(Item::new()).await?, 3);
    assert_eq!(b.allocate(Item::new()).await?, 2);

    assert_eq!(a.history().await?.len(), 2);
    assert_eq!(b.history().await?.len(), 1);
    assert_eq!(scan(db.as_ref(), HISTORY_TABLE).await?.len(), 3);
    Ok(())
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn parallel_allocations_under_contention() -> Result<()> {
    let db = Arc::new(Racing::new(memory_store()?, N as usize));
    let alloc = Arc::new(HistoryAllocator::new(db.clone(), history_config(1)));

    let futs = (0..N).map(|i| {
        let alloc = alloc.clone();
        async move {
            let v = alloc.allocate(item! { "writer" => i }).await?;
            Ok::<_, anyhow::Error>((v, i))
        }
    });
    let allocated: BTreeMap<i64, i64> = futures::future::try_join_all(futs)
        .await?
        .into_iter()
        .collect();
    assert_eq!(
        allocated.keys().copied().collect::<Vec<_>>(),
        (2..=N + 1).collect::<Vec<_>>()
    );
    assert!(db.conflicts() >= N as usize - 1);

    // Every snapshot was written by the caller who got its version.
    let history = alloc.history().await?;
    assert_eq!(history.len(), N as usize);
    for snapshot in &history {
        let v = snapshot["version"].as_int().unwrap();
        assert_eq!(snapshot["writer"], Value::Int(allocated[&v]));
    }

    let owner = alloc.get().await?.unwrap();
    assert_eq!(owner["version"], Value::Int(N + 1));
    assert_eq!(Some(&owner), history.last());
    Ok(())
}

#[test(tokio::test)]
async fn capacity_error_leaves_nothing_behind() -> Result<()> {
    let db = Arc::new(Racing::new(
        builder().with_max_item_size(1024).memory()?,
        1,
    ));
    db.put(ConditionalPut::new(
        WIDGET_TABLE,
        item! { "widgetID" => 1, "widgetName" => "spoon" },
    ))
    .await?;

    let alloc = HistoryAllocator::new(db.clone(), history_config(1));
    let e = alloc
        .allocate(item! { "blob" => vec![0u8; 4096] })
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&e), ErrorKind::Capacity);
    assert_eq!(db.attempts(), 1);

    assert_eq!(
        alloc.get().await?,
        Some(item! { "widgetID" => 1, "widgetName" => "spoon" })
    );
    assert!(alloc.history().await?.is_empty());
    Ok(())
}

#[test(tokio::test(flavor = "multi_thread"))]
async fn redb_parallel_allocations() -> Result<()> {
    let db = builder().redb()?;
    let alloc = Arc::new(HistoryAllocator::new(db.clone(), history_config(7)));

    let mut futs = vec![];
    for i in 0..N {
        let alloc = alloc.clone();
        futs.push(tokio::spawn(async move {
            alloc.allocate(item! { "writer" => i }).await
        }));
    }
    let mut versions = vec![];
    for fut in futs {
        versions.push(fut.await??);
    }
    versions.sort();
    assert_eq!(versions, (2..=N + 1).collect::<Vec<_>>());

    let history: Vec<i64> = alloc
        .history()
        .await?
        .iter()
        .map(|x| x["version"].as_int().unwrap())
        .collect();
    assert_eq!(history, versions);
    Ok(())
}
