use asupersync::runtime::RuntimeBuilder;
use ormlet::memory::{MemoryStore, northwind};
use ormlet::prelude::*;

fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn fetches(db: &Database<MemoryStore>) -> usize {
    db.adapter().stats().fetches
}

fn text(record: &RecordRef, field: &str) -> String {
    record.get_as::<String>(field).unwrap()
}

#[test]
fn deferred_navigation_fetches_once() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);
        let chai = unwrap_outcome(session.find(&cx, "products", &[Value::Int(1)]).await).unwrap();
        assert!(!chai.is_loaded("category"));

        let before = fetches(&db);
        let first = unwrap_outcome(session.navigate(&cx, &chai, "category").await);
        let second = unwrap_outcome(session.navigate(&cx, &chai, "category").await);
        assert_eq!(fetches(&db), before + 1);
        assert!(chai.is_loaded("category"));

        let beverages = first.as_one().unwrap();
        assert!(beverages.ptr_eq(second.as_one().unwrap()));
        assert_eq!(text(beverages, "category_name"), "Beverages");
        assert_eq!(session.state_of(beverages), Lifecycle::Unchanged);

        // The category's products come back through the identity map.
        let products = unwrap_outcome(session.navigate(&cx, beverages, "products").await);
        assert_eq!(products.len(), 4);
        assert!(products.as_many().iter().any(|p| p.ptr_eq(&chai)));
        assert_eq!(session.load_stats().total_loads, 2);
    });
}

#[test]
fn repeated_single_loads_are_counted() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);
        let query = session
            .query("products")
            .filter(Expr::col("supplier_id").eq(2_i32).or(Expr::col("supplier_id").eq(3_i32)));
        let products = unwrap_outcome(session.fetch(&cx, &query).await);
        assert_eq!(products.len(), 5);

        for product in &products {
            let supplier = unwrap_outcome(session.navigate(&cx, product, "supplier").await);
            assert!(supplier.as_one().is_some());
        }
        let stats = session.load_stats();
        assert_eq!(stats.total_loads, 5);
        assert_eq!(stats.relations_loaded, 1);
        assert_eq!(stats.potential_n1, 1);

        // Suppliers are shared: two distinct instances for five products.
        let suppliers: Vec<RecordRef> = products
            .iter()
            .filter_map(|p| p.related("supplier").and_then(|r| r.as_one().cloned()))
            .collect();
        assert!(suppliers[0].ptr_eq(&suppliers[1]));
        assert!(!suppliers[0].ptr_eq(&suppliers[4]));
    });
}

#[test]
fn explicit_loading_waits_for_load_relation() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database_with(SessionConfig::new(LoadingStrategy::Explicit)).unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);
        let davolio =
            unwrap_outcome(session.find(&cx, "employees", &[Value::Int(1)]).await).unwrap();

        let before = fetches(&db);
        let absent = unwrap_outcome(session.navigate(&cx, &davolio, "territories").await);
        assert!(absent.is_empty());
        assert!(!davolio.is_loaded("territories"));
        assert_eq!(fetches(&db), before);

        // The whole remaining path arrives in one fetch.
        unwrap_outcome(session.load_relation(&cx, &davolio, "territories.region").await);
        assert_eq!(fetches(&db), before + 1);
        unwrap_outcome(session.load_relation(&cx, &davolio, "territories.region").await);
        assert_eq!(fetches(&db), before + 1);

        let territories = unwrap_outcome(session.navigate(&cx, &davolio, "territories").await);
        let mut names: Vec<String> = territories
            .as_many()
            .iter()
            .map(|t| text(t, "territory_description"))
            .collect();
        names.sort();
        assert_eq!(names, vec!["Bellevue", "Phoenix"]);
        for territory in territories.as_many() {
            let region = territory.related("region").unwrap();
            assert_eq!(text(region.as_one().unwrap(), "region_description"), "Western");
        }

        // Navigation takes one relation name; paths go through load_relation.
        match session.navigate(&cx, &davolio, "territories.region").await {
            Outcome::Err(Error::Validation(e)) => assert_eq!(e.kind, ormlet::ValidationErrorKind::Shape),
            other => panic!("expected a validation error, got {other:?}"),
        }
    });
}

#[test]
fn eager_includes_cost_one_round_trip() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db = northwind::database().unwrap();
        let mut session = unwrap_outcome(db.open(&cx).await);

        let before = fetches(&db);
        let customers = session
            .query("customers")
            .include("orders")
            .with_loading(LoadingStrategy::Eager);
        let rows = unwrap_outcome(session.fetch(&cx, &customers).await);
        assert_eq!(fetches(&db), before + 1);
        assert!(rows.iter().all(|c| c.is_loaded("orders")));
        let orders: usize = rows
            .iter()
            .map(|c| c.related("orders").map_or(0, |r| r.len()))
            .sum();
        assert_eq!(orders, 8);

        let before = fetches(&db);
        let employees = session
            .query("employees")
            .include("territories.region")
            .include("manager")
            .order_by(Expr::col("employee_id"))
            .with_loading(LoadingStrategy::Eager);
        let rows = unwrap_outcome(session.fetch(&cx, &employees).await);
        assert_eq!(fetches(&db), before + 1);

        let fuller = &rows[1];
        assert_eq!(text(fuller, "last_name"), "Fuller");
        let territories = unwrap_outcome(session.navigate(&cx, fuller, "territories").await);
        assert_eq!(territories.len(), 3);
        for territory in territories.as_many() {
            let region = unwrap_outcome(session.navigate(&cx, territory, "region").await);
            assert_eq!(text(region.as_one().unwrap(), "region_description"), "Eastern");
        }
        let manager = unwrap_outcome(session.navigate(&cx, &rows[0], "manager").await);
        assert!(manager.as_one().unwrap().ptr_eq(fuller));
        assert_eq!(fetches(&db), before + 1);

        // Not included, so eager records answer without I/O.
        let orders = unwrap_outcome(session.navigate(&cx, fuller, "orders").await);
        assert!(orders.is_empty());
        assert_eq!(fetches(&db), before + 1);
    });
}

#[test]
fn unset_foreign_keys_need_no_fetch() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        for strategy in [
            LoadingStrategy::Deferred,
            LoadingStrategy::Explicit,
            LoadingStrategy::Eager,
        ] {
            let db = northwind::database_with(SessionConfig::new(strategy)).unwrap();
            let mut session = unwrap_outcome(db.open(&cx).await);
            let query = session
                .query("employees")
                .filter(Expr::col("reports_to").is_null());
            let fuller = unwrap_outcome(session.first(&cx, &query).await).unwrap();
            let before = fetches(&db);

            let manager = unwrap_outcome(session.navigate(&cx, &fuller, "manager").await);
            assert!(manager.as_one().is_none());
            unwrap_outcome(session.load_relation(&cx, &fuller, "manager").await);
            assert!(fuller.is_loaded("manager"));
            assert_eq!(fetches(&db), before);
        }
    });
}
