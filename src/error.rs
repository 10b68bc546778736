use derive_more::{Display, From};

pub type Result<T> = core::result::Result<T, Error>;

/// Pipeline stage a failure is attributed to
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    #[display("tile partitioning")]
    Partition,
    #[display("tile extraction")]
    TileExtraction,
    #[display("mask generation")]
    Segmentation,
    #[display("mask stitching")]
    Stitching,
    #[display("label rasterization")]
    Rasterization,
    #[display("postprocessing")]
    Postprocessing,
    #[display("centroid extraction")]
    Centroids,
}

#[derive(Debug, Display, From)]
pub enum Error {
    #[display("invalid grid: cell count {cell_count} is not a positive perfect square fitting a {width}x{height} image")]
    InvalidGrid {
        cell_count: u32,
        width: u32,
        height: u32,
    },
    #[display("segmentation oracle failed on {target}: {message}")]
    OracleInvocation { target: String, message: String },
    #[display("{operation} needs at least one mask record")]
    EmptyInput { operation: &'static str },
    #[display("could not allocate a {width}x{height} label image for {records} masks")]
    ResourceExhaustion {
        width: u32,
        height: u32,
        records: usize,
    },
    #[display("mask is {found_width}x{found_height}, expected {width}x{height}")]
    MaskShape {
        width: u32,
        height: u32,
        found_width: u32,
        found_height: u32,
    },
    #[display("mask record {index} has no pixels")]
    EmptyMask { index: usize },
    #[display("segmentation run cancelled")]
    Cancelled,
    #[display("segmentation worker panicked: {_0}")]
    WorkerPanic(String),
    #[display("{failed} of {total} runs failed")]
    RunsFailed { failed: usize, total: usize },
    #[display("{stage} failed: {source}")]
    Stage { stage: Stage, source: Box<Error> },
    #[display("{_0}")]
    Config(String),

    // -- Externals
    #[from]
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    #[from]
    #[display("image error: {_0}")]
    Image(image::error::ImageError),
    #[from]
    #[display("PNG encoding error: {_0}")]
    PngEncoding(png::EncodingError),
}

impl Error {
    /// Attribute this failure to a pipeline stage
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Failures a run can survive by skipping only the affected output
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::ResourceExhaustion { .. } => true,
            Error::Stage { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Stage { source, .. } => Some(source.as_ref()),
            Error::Io(e) => Some(e),
            Error::Image(e) => Some(e),
            Error::PngEncoding(e) => Some(e),
            _ => None,
        }
    }
}
