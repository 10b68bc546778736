use tiled_segmenter::Result;

fn main() -> Result<()> {
    tiled_segmenter::run(wild::args_os())
}
