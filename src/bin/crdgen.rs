use kube::CustomResourceExt;
use kube_image_tracker::crd::{ImageRecord, ScanRequest};

fn main() -> anyhow::Result<()> {
    for crd in [ScanRequest::crd(), ImageRecord::crd()] {
        println!("---");
        print!("{}", serde_yaml_ng::to_string(&crd)?);
    }
    Ok(())
}
