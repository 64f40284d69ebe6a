//! A Northwind-shaped sample dataset.
//!
//! Small enough to reason about in tests, shaped like the classic sample
//! database: categories and suppliers own products, customers place orders
//! handled by employees and carried by shippers, employees cover territories
//! (many-to-many through `employee_territories`) and territories belong to
//! regions.
//!
//! ```ignore
//! let db = northwind::database()?;
//! let mut session = unwrap(db.open(&cx).await);
//! ```

use crate::store::MemoryStore;
use crate::table::TableSet;
use ormlet_core::{
    ColumnInfo, FieldDef, LinkTable, Registry, RelationDef, Result, Row, Schema, SqlType, Value,
};
use ormlet_session::{Database, RoutineParam, RoutineRegistry, RoutineSignature, SessionConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Schemas of the sample dataset.
#[allow(clippy::result_large_err)]
pub fn registry() -> Result<Registry> {
    Registry::new()
        .register(
            Schema::builder("categories")
                .field(FieldDef::new("category_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("category_name", SqlType::Text).unique())
                .field(FieldDef::new("description", SqlType::Text).nullable())
                .relation(RelationDef::one_to_many(
                    "products",
                    "products",
                    "category_id",
                    "category_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("suppliers")
                .field(FieldDef::new("supplier_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("company_name", SqlType::Text))
                .field(FieldDef::new("city", SqlType::Text).nullable())
                .field(FieldDef::new("country", SqlType::Text).nullable())
                .relation(RelationDef::one_to_many(
                    "products",
                    "products",
                    "supplier_id",
                    "supplier_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("products")
                .field(FieldDef::new("product_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("product_name", SqlType::Text))
                .field(FieldDef::new("supplier_id", SqlType::Integer).nullable())
                .field(FieldDef::new("category_id", SqlType::Integer).nullable())
                .field(FieldDef::new("unit_price", SqlType::Double).nullable())
                .field(FieldDef::new("units_in_stock", SqlType::Integer).nullable())
                .field(FieldDef::new("discontinued", SqlType::Boolean))
                .relation(RelationDef::many_to_one(
                    "category",
                    "categories",
                    "category_id",
                    "category_id",
                ))
                .relation(RelationDef::many_to_one(
                    "supplier",
                    "suppliers",
                    "supplier_id",
                    "supplier_id",
                ))
                .relation(RelationDef::one_to_many(
                    "order_details",
                    "order_details",
                    "product_id",
                    "product_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("shippers")
                .field(FieldDef::new("shipper_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("company_name", SqlType::Text).unique())
                .field(FieldDef::new("phone", SqlType::Text).nullable())
                .relation(RelationDef::one_to_many("orders", "orders", "shipper_id", "ship_via"))
                .build()?,
        )?
        .register(
            Schema::builder("customers")
                .field(FieldDef::new("customer_id", SqlType::Text).primary_key())
                .field(FieldDef::new("company_name", SqlType::Text))
                .field(FieldDef::new("contact_name", SqlType::Text).nullable())
                .field(FieldDef::new("city", SqlType::Text).nullable())
                .field(FieldDef::new("country", SqlType::Text).nullable())
                .relation(RelationDef::one_to_many(
                    "orders",
                    "orders",
                    "customer_id",
                    "customer_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("employees")
                .field(FieldDef::new("employee_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("last_name", SqlType::Text))
                .field(FieldDef::new("first_name", SqlType::Text))
                .field(FieldDef::new("title", SqlType::Text).nullable())
                .field(FieldDef::new("city", SqlType::Text).nullable())
                .field(FieldDef::new("reports_to", SqlType::Integer).nullable())
                .relation(RelationDef::many_to_one(
                    "manager",
                    "employees",
                    "reports_to",
                    "employee_id",
                ))
                .relation(RelationDef::one_to_many(
                    "reports",
                    "employees",
                    "employee_id",
                    "reports_to",
                ))
                .relation(RelationDef::many_to_many(
                    "territories",
                    "territories",
                    "employee_id",
                    LinkTable::new("employee_territories", "employee_id", "territory_id"),
                    "territory_id",
                ))
                .relation(RelationDef::one_to_many(
                    "orders",
                    "orders",
                    "employee_id",
                    "employee_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("regions")
                .field(FieldDef::new("region_id", SqlType::Integer).primary_key())
                .field(FieldDef::new("region_description", SqlType::Text))
                .relation(RelationDef::one_to_many(
                    "territories",
                    "territories",
                    "region_id",
                    "region_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("territories")
                .field(FieldDef::new("territory_id", SqlType::Text).primary_key())
                .field(FieldDef::new("territory_description", SqlType::Text))
                .field(FieldDef::new("region_id", SqlType::Integer))
                .relation(RelationDef::many_to_one(
                    "region",
                    "regions",
                    "region_id",
                    "region_id",
                ))
                .relation(RelationDef::many_to_many(
                    "employees",
                    "employees",
                    "territory_id",
                    LinkTable::new("employee_territories", "territory_id", "employee_id"),
                    "employee_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("employee_territories")
                .field(FieldDef::new("employee_id", SqlType::Integer).primary_key())
                .field(FieldDef::new("territory_id", SqlType::Text).primary_key())
                .relation(RelationDef::many_to_one(
                    "employee",
                    "employees",
                    "employee_id",
                    "employee_id",
                ))
                .relation(RelationDef::many_to_one(
                    "territory",
                    "territories",
                    "territory_id",
                    "territory_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("orders")
                .field(FieldDef::new("order_id", SqlType::Integer).primary_key().generated())
                .field(FieldDef::new("customer_id", SqlType::Text).nullable())
                .field(FieldDef::new("employee_id", SqlType::Integer).nullable())
                .field(FieldDef::new("order_date", SqlType::Date).nullable())
                .field(FieldDef::new("ship_via", SqlType::Integer).nullable())
                .field(FieldDef::new("freight", SqlType::Double).nullable())
                .field(FieldDef::new("ship_city", SqlType::Text).nullable())
                .relation(RelationDef::many_to_one(
                    "customer",
                    "customers",
                    "customer_id",
                    "customer_id",
                ))
                .relation(RelationDef::many_to_one(
                    "employee",
                    "employees",
                    "employee_id",
                    "employee_id",
                ))
                .relation(RelationDef::many_to_one(
                    "shipper",
                    "shippers",
                    "ship_via",
                    "shipper_id",
                ))
                .relation(RelationDef::one_to_many(
                    "details",
                    "order_details",
                    "order_id",
                    "order_id",
                ))
                .build()?,
        )?
        .register(
            Schema::builder("order_details")
                .field(FieldDef::new("order_id", SqlType::Integer).primary_key())
                .field(FieldDef::new("product_id", SqlType::Integer).primary_key())
                .field(FieldDef::new("unit_price", SqlType::Double))
                .field(FieldDef::new("quantity", SqlType::Integer))
                .relation(RelationDef::many_to_one("order", "orders", "order_id", "order_id"))
                .relation(RelationDef::many_to_one(
                    "product",
                    "products",
                    "product_id",
                    "product_id",
                ))
                .build()?,
        )
}

/// Signatures of the sample routines.
pub fn routines() -> RoutineRegistry {
    RoutineRegistry::new()
        .register(RoutineSignature::new("ten_most_expensive_products"))
        .register(
            RoutineSignature::new("most_expensive_products")
                .param(RoutineParam::new("count", SqlType::Integer)),
        )
        .register(
            RoutineSignature::new("cust_order_hist")
                .param(RoutineParam::new("customer_id", SqlType::Text)),
        )
        .register(
            RoutineSignature::new("customer_orders")
                .param(RoutineParam::new("customer_id", SqlType::Text))
                .returns("orders"),
        )
}

/// A seeded store with the sample routines registered.
#[allow(clippy::result_large_err)]
pub fn store(registry: &Registry) -> Result<MemoryStore> {
    let store = MemoryStore::from_registry(registry);
    seed(&store)?;
    store.register_routine("ten_most_expensive_products", ten_most_expensive_products);
    store.register_routine("most_expensive_products", most_expensive_products);
    store.register_routine("cust_order_hist", cust_order_hist);
    store.register_routine("customer_orders", customer_orders);
    Ok(store)
}

/// A database over a fresh seeded store, with default session settings.
#[allow(clippy::result_large_err)]
pub fn database() -> Result<Database<MemoryStore>> {
    database_with(SessionConfig::default())
}

#[allow(clippy::result_large_err)]
pub fn database_with(config: SessionConfig) -> Result<Database<MemoryStore>> {
    let registry = registry()?;
    let store = store(&registry)?;
    Ok(Database::new(store, registry)?
        .with_routines(routines())?
        .with_config(config))
}

#[allow(clippy::result_large_err)]
fn seed(store: &MemoryStore) -> Result<()> {
    for (id, name) in [(1_i32, "Eastern"), (2, "Western"), (3, "Northern"), (4, "Southern")] {
        store.seed(
            "regions",
            &[("region_id", id.into()), ("region_description", name.into())],
        )?;
    }
    for (id, name, region) in [
        ("01581", "Westboro", 1_i32),
        ("01730", "Bedford", 1),
        ("02116", "Boston", 1),
        ("85014", "Phoenix", 2),
        ("98004", "Bellevue", 2),
        ("48084", "Troy", 3),
        ("55439", "Minneapolis", 3),
        ("29202", "Columbia", 4),
    ] {
        store.seed(
            "territories",
            &[
                ("territory_id", id.into()),
                ("territory_description", name.into()),
                ("region_id", region.into()),
            ],
        )?;
    }

    // Managers first: `reports_to` must reference an existing row.
    for (id, last, first, title, city, reports_to) in [
        (2_i32, "Fuller", "Andrew", "Vice President, Sales", "Tacoma", None),
        (1, "Davolio", "Nancy", "Sales Representative", "Seattle", Some(2_i32)),
        (3, "Leverling", "Janet", "Sales Representative", "Kirkland", Some(2)),
        (4, "Peacock", "Margaret", "Sales Representative", "Redmond", Some(2)),
        (5, "Buchanan", "Steven", "Sales Manager", "London", Some(2)),
    ] {
        store.seed(
            "employees",
            &[
                ("employee_id", id.into()),
                ("last_name", last.into()),
                ("first_name", first.into()),
                ("title", title.into()),
                ("city", city.into()),
                ("reports_to", reports_to.into()),
            ],
        )?;
    }
    for (employee, territory) in [
        (1_i32, "85014"),
        (1, "98004"),
        (2, "01581"),
        (2, "01730"),
        (2, "02116"),
        (3, "29202"),
        (4, "98004"),
        (5, "48084"),
        (5, "55439"),
    ] {
        store.seed(
            "employee_territories",
            &[("employee_id", employee.into()), ("territory_id", territory.into())],
        )?;
    }

    for (name, description) in [
        ("Beverages", "Soft drinks, coffees, teas, beers, and ales"),
        ("Condiments", "Sweet and savory sauces, relishes, spreads, and seasonings"),
        ("Confections", "Desserts, candies, and sweet breads"),
        ("Dairy Products", "Cheeses"),
        ("Grains/Cereals", "Breads, crackers, pasta, and cereal"),
        ("Meat/Poultry", "Prepared meats"),
        ("Produce", "Dried fruit and bean curd"),
        ("Seafood", "Seaweed and fish"),
    ] {
        store.seed(
            "categories",
            &[("category_name", name.into()), ("description", description.into())],
        )?;
    }
    for (name, city, country) in [
        ("Exotic Liquids", "London", "UK"),
        ("New Orleans Cajun Delights", "New Orleans", "USA"),
        ("Grandma Kelly's Homestead", "Ann Arbor", "USA"),
        ("Tokyo Traders", "Tokyo", "Japan"),
        ("Pavlova, Ltd.", "Melbourne", "Australia"),
        ("Aux joyeux ecclésiastiques", "Paris", "France"),
    ] {
        store.seed(
            "suppliers",
            &[
                ("company_name", name.into()),
                ("city", city.into()),
                ("country", country.into()),
            ],
        )?;
    }

    for (id, name, supplier, category, price, stock, discontinued) in [
        (1, "Chai", Some(1_i32), Some(1_i32), 18.0_f64, 39_i32, false),
        (2, "Chang", Some(1), Some(1), 19.0, 17, false),
        (3, "Aniseed Syrup", Some(1), Some(2), 10.0, 13, false),
        (4, "Chef Anton's Cajun Seasoning", Some(2), Some(2), 22.0, 53, false),
        (5, "Chef Anton's Gumbo Mix", Some(2), Some(2), 21.35, 0, true),
        (6, "Grandma's Boysenberry Spread", Some(3), Some(2), 25.0, 120, false),
        (7, "Uncle Bob's Organic Dried Pears", Some(3), Some(7), 30.0, 15, false),
        (8, "Northwoods Cranberry Sauce", Some(3), Some(2), 40.0, 6, false),
        (9, "Mishi Kobe Niku", Some(4), Some(6), 97.0, 29, true),
        (10, "Ikura", Some(4), Some(8), 31.0, 31, false),
        (16, "Pavlova", Some(5), Some(3), 17.45, 29, false),
        (17, "Alice Mutton", Some(5), Some(6), 39.0, 0, true),
        (18, "Carnarvon Tigers", Some(5), Some(8), 62.5, 42, false),
        (38, "Côte de Blaye", Some(6), Some(1), 263.5, 17, false),
        (39, "Chartreuse verte", Some(6), Some(1), 18.0, 69, false),
        (78, "House Blend Sampler", None, None, 12.0, 5, false),
    ] {
        store.seed(
            "products",
            &[
                ("product_id", Value::Int(id)),
                ("product_name", name.into()),
                ("supplier_id", supplier.into()),
                ("category_id", category.into()),
                ("unit_price", price.into()),
                ("units_in_stock", stock.into()),
                ("discontinued", discontinued.into()),
            ],
        )?;
    }

    for (name, phone) in [
        ("Speedy Express", "(503) 555-9831"),
        ("United Package", "(503) 555-3199"),
        ("Federal Shipping", "(503) 555-9931"),
    ] {
        store.seed("shippers", &[("company_name", name.into()), ("phone", phone.into())])?;
    }
    for (id, name, contact, city, country) in [
        ("ALFKI", "Alfreds Futterkiste", "Maria Anders", "Berlin", "Germany"),
        ("ANATR", "Ana Trujillo Emparedados y helados", "Ana Trujillo", "México D.F.", "Mexico"),
        ("AROUT", "Around the Horn", "Thomas Hardy", "London", "UK"),
        ("BERGS", "Berglunds snabbköp", "Christina Berglund", "Luleå", "Sweden"),
        ("BONAP", "Bon app'", "Laurence Lebihan", "Marseille", "France"),
        ("FISSA", "FISSA Fabrica Inter. Salchichas S.A.", "Diego Roel", "Madrid", "Spain"),
        ("SEVES", "Seven Seas Imports", "Hari Kumar", "London", "UK"),
    ] {
        store.seed(
            "customers",
            &[
                ("customer_id", id.into()),
                ("company_name", name.into()),
                ("contact_name", contact.into()),
                ("city", city.into()),
                ("country", country.into()),
            ],
        )?;
    }

    // Dates are days since the Unix epoch.
    for (id, customer, employee, date, ship_via, freight, city) in [
        (10278, "BERGS", 3_i32, 9720, 2_i32, 92.69_f64, "Luleå"),
        (10308, "ANATR", 2, 9757, 3, 1.61, "México D.F."),
        (10331, "BONAP", 5, 9785, 1, 10.19, "Marseille"),
        (10355, "AROUT", 1, 9815, 1, 41.95, "London"),
        (10359, "SEVES", 5, 9821, 3, 288.43, "London"),
        (10383, "AROUT", 3, 9846, 3, 34.24, "London"),
        (10643, "ALFKI", 1, 10098, 1, 29.46, "Berlin"),
        (10692, "ALFKI", 4, 10137, 2, 61.02, "Berlin"),
    ] {
        store.seed(
            "orders",
            &[
                ("order_id", Value::Int(id)),
                ("customer_id", customer.into()),
                ("employee_id", employee.into()),
                ("order_date", Value::Date(date)),
                ("ship_via", ship_via.into()),
                ("freight", freight.into()),
                ("ship_city", city.into()),
            ],
        )?;
    }
    for (order, product, price, quantity) in [
        (10278, 4, 17.6_f64, 16),
        (10278, 17, 31.2, 15),
        (10308, 7, 24.0, 1),
        (10308, 10, 24.8, 5),
        (10331, 16, 13.9, 15),
        (10355, 1, 14.4, 25),
        (10355, 2, 15.2, 25),
        (10359, 17, 31.2, 56),
        (10359, 38, 210.8, 10),
        (10383, 18, 50.0, 20),
        (10643, 3, 10.0, 6),
        (10643, 39, 18.0, 21),
        (10692, 6, 25.0, 16),
    ] {
        store.seed(
            "order_details",
            &[
                ("order_id", Value::Int(order)),
                ("product_id", Value::Int(product)),
                ("unit_price", price.into()),
                ("quantity", Value::Int(quantity)),
            ],
        )?;
    }
    Ok(())
}

fn column(row: &Row, name: &str) -> Value {
    row.get_by_name(name).cloned().unwrap_or(Value::Null)
}

/// Priced products, most expensive first.
fn by_price(tables: &TableSet) -> Vec<&Row> {
    let mut products: Vec<&Row> = tables
        .rows("products")
        .iter()
        .filter(|row| !column(row, "unit_price").is_null())
        .collect();
    products.sort_by(|a, b| column(b, "unit_price").sort_cmp(&column(a, "unit_price")));
    products
}

#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn ten_most_expensive_products(tables: &TableSet, _params: &[Value]) -> Result<Vec<Row>> {
    let columns = Arc::new(ColumnInfo::new(vec![
        "ten_most_expensive_products".into(),
        "unit_price".into(),
    ]));
    Ok(by_price(tables)
        .into_iter()
        .take(10)
        .map(|row| {
            Row::with_columns(
                Arc::clone(&columns),
                vec![column(row, "product_name"), column(row, "unit_price")],
            )
        })
        .collect())
}

#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn most_expensive_products(tables: &TableSet, params: &[Value]) -> Result<Vec<Row>> {
    let count = params
        .first()
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0);
    let columns = Arc::new(ColumnInfo::new(vec![
        "product_id".into(),
        "product_name".into(),
        "unit_price".into(),
    ]));
    Ok(by_price(tables)
        .into_iter()
        .take(count)
        .map(|row| {
            Row::with_columns(
                Arc::clone(&columns),
                vec![
                    column(row, "product_id"),
                    column(row, "product_name"),
                    column(row, "unit_price"),
                ],
            )
        })
        .collect())
}

fn orders_of<'a>(tables: &'a TableSet, params: &[Value]) -> Vec<&'a Row> {
    let Some(customer) = params.first() else {
        return Vec::new();
    };
    tables
        .rows("orders")
        .iter()
        .filter(|order| column(order, "customer_id").sql_eq(customer))
        .collect()
}

/// Quantity ordered per product by one customer, by product name.
#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn cust_order_hist(tables: &TableSet, params: &[Value]) -> Result<Vec<Row>> {
    let orders: Vec<Value> = orders_of(tables, params)
        .into_iter()
        .map(|order| column(order, "order_id"))
        .collect();
    let mut totals: HashMap<i64, i64> = HashMap::new();
    for detail in tables.rows("order_details") {
        let order = column(detail, "order_id");
        if !orders.iter().any(|id| id.sql_eq(&order)) {
            continue;
        }
        if let (Some(product), Some(quantity)) = (
            column(detail, "product_id").as_i64(),
            column(detail, "quantity").as_i64(),
        ) {
            *totals.entry(product).or_default() += quantity;
        }
    }

    let columns = Arc::new(ColumnInfo::new(vec!["product_name".into(), "total".into()]));
    let mut rows: Vec<Row> = tables
        .rows("products")
        .iter()
        .filter_map(|product| {
            let id = column(product, "product_id").as_i64()?;
            let total = totals.get(&id)?;
            Some(Row::with_columns(
                Arc::clone(&columns),
                vec![column(product, "product_name"), Value::BigInt(*total)],
            ))
        })
        .collect();
    rows.sort_by(|a, b| column(a, "product_name").sort_cmp(&column(b, "product_name")));
    Ok(rows)
}

/// Whole order rows of one customer, oldest first.
#[allow(clippy::unnecessary_wraps, clippy::result_large_err)]
fn customer_orders(tables: &TableSet, params: &[Value]) -> Result<Vec<Row>> {
    let mut orders: Vec<Row> = orders_of(tables, params).into_iter().cloned().collect();
    orders.sort_by(|a, b| column(a, "order_date").sort_cmp(&column(b, "order_date")));
    Ok(orders)
}
