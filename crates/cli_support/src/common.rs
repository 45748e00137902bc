use clap::Args;

/// Dataset layout shared by the train, eval and detect tools.
#[derive(Debug, Clone, Args)]
pub struct DatasetArgs {
    /// Labels subdirectory relative to each dataset root.
    #[arg(long, default_value = "labels")]
    pub labels_subdir: String,
    /// Images subdirectory relative to each dataset root.
    #[arg(long, default_value = ".")]
    pub images_subdir: String,
}

/// Model input and class configuration.
#[derive(Debug, Clone, Args)]
pub struct ModelShapeArgs {
    /// Input shape as HEIGHTxWIDTHxCHANNELS; must be square.
    #[arg(long, default_value = "96x96x1", value_parser = parse_input_shape)]
    pub input_shape: (usize, usize, usize),
    /// Number of object classes (background excluded).
    #[arg(long, default_value_t = 1)]
    pub num_classes: usize,
    /// MobileNetV2 width multiplier.
    #[arg(long, default_value_t = 0.35)]
    pub alpha: f32,
}

/// Parse `96x96x1` (or `96x96` for a single channel) into (height, width, channels).
pub fn parse_input_shape(raw: &str) -> Result<(usize, usize, usize), String> {
    let parts: Vec<&str> = raw.trim().split(['x', 'X', ',']).collect();
    let nums = parts
        .iter()
        .map(|p| {
            p.trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid dimension '{p}' in input shape '{raw}'"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    match nums.as_slice() {
        [h, w] => Ok((*h, *w, 1)),
        [h, w, c] => Ok((*h, *w, *c)),
        _ => Err(format!(
            "input shape '{raw}' must look like HEIGHTxWIDTHxCHANNELS"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input_shapes() {
        assert_eq!(parse_input_shape("96x96x1"), Ok((96, 96, 1)));
        assert_eq!(parse_input_shape("64X64"), Ok((64, 64, 1)));
        assert_eq!(parse_input_shape("96,64,3"), Ok((96, 64, 3)));
        assert!(parse_input_shape("96").is_err());
        assert!(parse_input_shape("96xabcx3").is_err());
    }
}
