use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const TAGS: [&str; 6] = ["snow", "park", "powder", "carbon", "wax", "sale"];

/// `n` storefront pages with a customer and a product list, from a fixed
/// seed so every engine renders the same data.
pub fn storefronts(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n).map(|_| storefront(&mut rng)).collect()
}

fn storefront(rng: &mut StdRng) -> Value {
    let products: Vec<Value> = (0..rng.random_range(3..12))
        .map(|_| {
            let tags: Vec<&str> = TAGS
                .iter()
                .copied()
                .filter(|_| rng.random_bool(0.3))
                .collect();
            json!({
                "title": format!("{} {}cm", word(rng), rng.random_range(140..170)),
                "price": rng.random_range(200..900),
                "tags": tags,
                "available": rng.random_bool(0.8),
            })
        })
        .collect();

    json!({
        "shop": { "name": "Edge Boards", "currency": "NZD" },
        "customer": {
            "name": word(rng),
            "vip": rng.random_bool(0.2),
            "orders_count": rng.random_range(0..8),
        },
        "products": products,
    })
}

fn word(rng: &mut StdRng) -> String {
    let len = rng.random_range(4..9);
    let mut word: String = (0..len)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect();
    if let Some(first) = word.get_mut(..1) {
        first.make_ascii_uppercase();
    }
    word
}
