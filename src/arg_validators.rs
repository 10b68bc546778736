/// Cell counts the grid partitioner accepts from the command line
const CELL_COUNTS: [u32; 6] = [0, 4, 9, 16, 25, 36];

pub(crate) fn validate_cell_count(value: &str) -> Result<u32, String> {
    let num = value
        .parse::<u32>()
        .map_err(|_| "Not a valid whole number".to_string())?;
    if !CELL_COUNTS.contains(&num) {
        return Err(format!("Cell count must be one of {CELL_COUNTS:?}"));
    }
    Ok(num)
}

pub(crate) fn validate_fraction(value: &str) -> Result<f64, String> {
    let num = value
        .parse::<f64>()
        .map_err(|_| "Not a valid floating point number".to_string())?;
    if !(num > 0.0 && num <= 1.0) {
        return Err("Fraction must be greater than 0 and at most 1".to_string());
    }
    Ok(num)
}

pub(crate) fn validate_threshold(value: &str) -> Result<u8, String> {
    let num = value
        .parse::<u8>()
        .map_err(|_| "Not a valid gray level (0-255)".to_string())?;
    if num == 0 {
        return Err("Threshold must be at least 1".to_string());
    }
    Ok(num)
}
