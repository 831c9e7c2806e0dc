pub mod assets;
pub mod gallery;
pub mod generator;
pub mod output;
pub mod providers;
pub mod transport;

pub use assets::{download_image, save_base64_image, save_generated_image};
pub use gallery::{render_gallery, GalleryResult, GalleryTemplate};
pub use generator::ImageGenerator;
pub use output::{resolve_output_location, OutputContext, OutputLocation, OutputStrategy};
pub use providers::{ImageProvider, ProviderEndpoints};
pub use transport::{HttpReply, HttpTransport, ReqwestTransport};
