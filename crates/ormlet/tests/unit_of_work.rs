use asupersync::runtime::RuntimeBuilder;
use ormlet::memory::northwind;
use ormlet::prelude::*;
use ormlet::{ConstraintKind, InvalidOperationKind};
use std::sync::Arc;

fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn invalid_kind(result: Result<()>) -> InvalidOperationKind {
    match result {
        Err(Error::InvalidOperation(e)) => e.kind,
        other => panic!("expected an invalid operation, got {other:?}"),
    }
}

fn schema(db: &Database<ormlet::memory::MemoryStore>, name: &str) -> Arc<Schema> {
    Arc::clone(db.registry().require(name).unwrap())
}

#[test]
fn update_writes_only_the_changed_field() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut renamer = unwrap_outcome(db.open(&cx).await);
        let mut dialer = unwrap_outcome(db.open(&cx).await);

        let speedy = unwrap_outcome(renamer.find(&cx, "shippers", &[Value::Int(1)]).await).unwrap();
        let same = unwrap_outcome(dialer.find(&cx, "shippers", &[Value::Int(1)]).await).unwrap();
        assert!(!speedy.ptr_eq(&same));

        // Another session changes the phone after this one loaded the row.
        same.set("phone", "(503) 555-0000").unwrap();
        assert_eq!(unwrap_outcome(dialer.commit(&cx).await).updated, 1);

        speedy.set("company_name", "Speedy Express Ltd.").unwrap();
        speedy.set("phone", "(503) 555-9831").unwrap(); // unchanged value
        assert_eq!(renamer.state_of(&speedy), Lifecycle::Modified);
        assert_eq!(speedy.changed_fields(), vec!["company_name".to_string()]);

        let summary = unwrap_outcome(renamer.commit(&cx).await);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.total(), 1);
        assert_eq!(renamer.state_of(&speedy), Lifecycle::Unchanged);
        assert!(speedy.changed_fields().is_empty());
        assert!(!renamer.has_changes());

        let mut reader = unwrap_outcome(db.open(&cx).await);
        let query = reader
            .query("shippers")
            .filter(Expr::col("shipper_id").eq(1_i32));
        let fresh = unwrap_outcome(reader.first(&cx, &query).await).unwrap();
        assert_eq!(fresh.get("company_name"), Some(Value::from("Speedy Express Ltd.")));
        assert_eq!(fresh.get("phone"), Some(Value::from("(503) 555-0000")));
    });
}

#[test]
fn insert_assigns_the_generated_key() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);

        let shipper = RecordRef::new(&schema(&db, "shippers"))
            .with("company_name", "Northwind Couriers")
            .unwrap()
            .with("phone", "(206) 555-0199")
            .unwrap();
        session.add(&shipper).unwrap();
        assert_eq!(session.state_of(&shipper), Lifecycle::Added);
        assert_eq!(shipper.key(), None);

        let summary = unwrap_outcome(session.commit(&cx).await);
        assert_eq!(summary.inserted, 1);
        assert_eq!(session.state_of(&shipper), Lifecycle::Unchanged);
        assert_eq!(shipper.key(), Some(vec![Value::Int(4)]));

        // Tracked instances come back without a round trip.
        let fetched = db.adapter().stats().fetches;
        let found = unwrap_outcome(session.find(&cx, "shippers", &[Value::Int(4)]).await).unwrap();
        assert!(found.ptr_eq(&shipper));
        assert_eq!(db.adapter().stats().fetches, fetched);

        let mut reader = unwrap_outcome(db.open(&cx).await);
        let shippers = reader.query("shippers");
        let all = unwrap_outcome(reader.fetch(&cx, &shippers).await);
        assert_eq!(all.len(), 4);
        assert!(
            all.iter()
                .any(|s| s.get("company_name") == Some(Value::from("Northwind Couriers")))
        );
    });
}

#[test]
fn commit_orders_writes_by_dependency() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);

        // Child added before its parent.
        let product = RecordRef::new(&schema(&db, "products"))
            .with("product_name", "Gravad lax")
            .unwrap()
            .with("category_id", 9_i32)
            .unwrap()
            .with("unit_price", 26.0)
            .unwrap()
            .with("discontinued", false)
            .unwrap();
        let category = RecordRef::new(&schema(&db, "categories"))
            .with("category_id", 9_i32)
            .unwrap()
            .with("category_name", "Smoked Fish")
            .unwrap();
        session.add(&product).unwrap();
        session.add(&category).unwrap();

        // Parent removed before its child.
        let order = unwrap_outcome(session.find(&cx, "orders", &[Value::Int(10692)]).await).unwrap();
        let detail = unwrap_outcome(
            session
                .find(&cx, "order_details", &[Value::Int(10692), Value::Int(6)])
                .await,
        )
        .unwrap();
        session.remove(&order).unwrap();
        session.remove(&detail).unwrap();

        let batches = db.adapter().stats().batches;
        let summary = unwrap_outcome(session.commit(&cx).await);
        assert_eq!((summary.inserted, summary.deleted), (2, 2));
        assert_eq!(db.adapter().stats().batches, batches + 1);
        assert!(product.key().is_some());
        assert_eq!(session.state_of(&order), Lifecycle::Detached);
        assert_eq!(db.adapter().row_count("order_details"), 12);

        // An empty commit performs no I/O.
        let summary = unwrap_outcome(session.commit(&cx).await);
        assert_eq!(summary.total(), 0);
        assert_eq!(db.adapter().stats().batches, batches + 1);
    });
}

#[test]
fn rejected_commit_keeps_every_state() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);

        let united = unwrap_outcome(session.find(&cx, "shippers", &[Value::Int(2)]).await).unwrap();
        united.set("phone", "(503) 555-1111").unwrap();
        let duplicate = RecordRef::new(&schema(&db, "shippers"))
            .with("company_name", "Speedy Express")
            .unwrap();
        session.add(&duplicate).unwrap();

        match session.commit(&cx).await {
            Outcome::Err(Error::Constraint(e)) => {
                assert_eq!(e.kind, ConstraintKind::Unique);
                assert_eq!(e.schema, "shippers");
            }
            other => panic!("expected a constraint violation, got {other:?}"),
        }
        assert_eq!(session.state_of(&united), Lifecycle::Modified);
        assert_eq!(united.changed_fields(), vec!["phone".to_string()]);
        assert_eq!(session.state_of(&duplicate), Lifecycle::Added);
        assert_eq!(duplicate.key(), None);
        assert!(session.has_changes());

        let mut reader = unwrap_outcome(db.open(&cx).await);
        let shippers = reader.query("shippers");
        let all = unwrap_outcome(reader.fetch(&cx, &shippers).await);
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].get("phone"), Some(Value::from("(503) 555-3199")));

        // Fixing the offending record lets the same batch through.
        duplicate.set("company_name", "Speedy Express II").unwrap();
        let summary = unwrap_outcome(session.commit(&cx).await);
        assert_eq!((summary.inserted, summary.updated), (1, 1));
    });
}

#[test]
fn removed_records_leave_the_session() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);
        let key = [Value::from("FISSA")];

        let fissa = unwrap_outcome(session.find(&cx, "customers", &key).await).unwrap();
        session.remove(&fissa).unwrap();
        assert_eq!(session.state_of(&fissa), Lifecycle::Removed);
        session.remove(&fissa).unwrap();
        assert!(unwrap_outcome(session.find(&cx, "customers", &key).await).is_none());
        assert_eq!(
            invalid_kind(fissa.set("city", "Barcelona")),
            InvalidOperationKind::Removed
        );

        assert_eq!(unwrap_outcome(session.commit(&cx).await).deleted, 1);
        assert_eq!(session.state_of(&fissa), Lifecycle::Detached);
        assert_eq!(session.tracked_count(), 0);
        let remaining = session.query("customers");
        assert_eq!(unwrap_outcome(session.count(&cx, &remaining).await), 6);

        // A record with the same key attaches like a fresh load.
        let again = RecordRef::new(&schema(&db, "customers"))
            .with("customer_id", "FISSA")
            .unwrap()
            .with("company_name", "FISSA Fabrica Inter. Salchichas S.A.")
            .unwrap();
        session.attach(&again).unwrap();
        assert_eq!(session.state_of(&again), Lifecycle::Unchanged);
        assert!(unwrap_outcome(session.find(&cx, "customers", &key).await)
            .unwrap()
            .ptr_eq(&again));
    });
}

#[test]
fn tracker_misuse_is_rejected() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);
        let shippers = schema(&db, "shippers");

        let fresh = RecordRef::new(&shippers).with("company_name", "Eastern Freight").unwrap();
        session.add(&fresh).unwrap();
        assert_eq!(invalid_kind(session.add(&fresh)), InvalidOperationKind::AlreadyTracked);

        // Removing an added record just forgets it.
        session.remove(&fresh).unwrap();
        assert_eq!(session.state_of(&fresh), Lifecycle::Detached);
        assert_eq!(invalid_kind(session.remove(&fresh)), InvalidOperationKind::NotTracked);
        assert_eq!(invalid_kind(session.attach(&fresh)), InvalidOperationKind::MissingKey);

        let speedy = unwrap_outcome(session.find(&cx, "shippers", &[Value::Int(1)]).await).unwrap();
        session.attach(&speedy).unwrap();
        let copy = RecordRef::new(&shippers)
            .with("shipper_id", 1_i32)
            .unwrap()
            .with("company_name", "Speedy Express")
            .unwrap();
        assert_eq!(invalid_kind(session.attach(&copy)), InvalidOperationKind::IdentityConflict);
        assert_eq!(invalid_kind(speedy.set("shipper_id", 7_i32)), InvalidOperationKind::KeyChange);
        assert!(!session.has_changes());
    });
}

#[test]
fn sessions_never_share_instances() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut left = unwrap_outcome(db.open(&cx).await);
        let mut right = unwrap_outcome(db.open(&cx).await);
        assert_ne!(left.id(), right.id());

        let query = left.query("categories").order_by(Expr::col("category_id"));
        let mine = unwrap_outcome(left.fetch(&cx, &query).await);
        let theirs = unwrap_outcome(right.fetch(&cx, &query).await);
        assert_eq!(mine.len(), 8);
        assert!(mine.iter().zip(&theirs).all(|(a, b)| !a.ptr_eq(b)));

        mine[0].set("description", "Drinks").unwrap();
        assert_eq!(
            theirs[0].get("description"),
            Some(Value::from("Soft drinks, coffees, teas, beers, and ales"))
        );
        assert!(!right.has_changes());

        assert_eq!(invalid_kind(right.attach(&mine[0])), InvalidOperationKind::ForeignSession);
        assert_eq!(invalid_kind(right.remove(&mine[1])), InvalidOperationKind::ForeignSession);
        match right.navigate(&cx, &mine[0], "products").await {
            Outcome::Err(Error::InvalidOperation(e)) => {
                assert_eq!(e.kind, InvalidOperationKind::ForeignSession);
            }
            other => panic!("expected a foreign session error, got {other:?}"),
        }

        assert_eq!(db.stats().sessions_open, 2);
        left.close();
        assert_eq!(db.stats().sessions_open, 1);
        drop(right);
        assert_eq!(db.stats().sessions_open, 0);
        assert_eq!(db.stats().sessions_opened, 2);
    });
}
