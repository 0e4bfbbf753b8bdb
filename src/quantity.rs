//! Parsing of Kubernetes resource quantities (`250m`, `8Gi`, `1e3`, ...).

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1048576.0),
    ("Gi", 1073741824.0),
    ("Ti", 1099511627776.0),
    ("Pi", 1125899906842624.0),
    ("Ei", 1152921504606846976.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 9] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// The value of a quantity in base units, or `None` if it is not a quantity.
pub fn parse(quantity: &str) -> Option<f64> {
    let quantity = quantity.trim();
    if quantity.is_empty() {
        return None;
    }

    for (suffix, factor) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES.iter()) {
        if let Some(number) = quantity.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * factor);
        }
    }

    quantity.parse::<f64>().ok()
}

/// CPU quantity as millicores.
pub fn cpu_millis(quantity: &str) -> Option<u64> {
    parse(quantity).map(|cores| (cores * 1000.0).round() as u64)
}

/// Memory quantity as bytes.
pub fn bytes(quantity: &str) -> Option<u64> {
    parse(quantity).map(|bytes| bytes.round() as u64)
}
