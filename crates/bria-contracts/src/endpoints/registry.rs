use indexmap::IndexMap;

pub const DEFAULT_HD_MODEL_VERSION: &str = "2.3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    pub name: &'static str,
    pub path: &'static str,
    pub summary: &'static str,
}

const BRIA_ENDPOINTS: &[EndpointSpec] = &[
    EndpointSpec {
        name: "text_to_image_hd",
        path: "text-to-image/hd/{model_version}",
        summary: "text-to-image generation at HD resolution",
    },
    EndpointSpec {
        name: "gen_fill",
        path: "gen_fill",
        summary: "generative fill inside a mask",
    },
    EndpointSpec {
        name: "erase_foreground",
        path: "erase_foreground",
        summary: "foreground removal",
    },
    EndpointSpec {
        name: "lifestyle_shot_by_text",
        path: "product/lifestyle_shot_by_text",
        summary: "product placed in a scene described by text",
    },
    EndpointSpec {
        name: "packshot",
        path: "product/packshot",
        summary: "product packshot on a solid background",
    },
    EndpointSpec {
        name: "prompt_enhancer",
        path: "prompt_enhancer",
        summary: "prompt enhancement",
    },
];

impl EndpointSpec {
    pub fn render_path(&self, params: &[(&str, &str)]) -> String {
        params.iter().fold(self.path.to_string(), |path, (key, value)| {
            path.replace(&format!("{{{key}}}"), value.trim_matches('/'))
        })
    }

    pub fn url(&self, api_base: &str, params: &[(&str, &str)]) -> String {
        format!(
            "{}/{}",
            api_base.trim_end_matches('/'),
            self.render_path(params).trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone)]
pub struct EndpointCatalogue {
    endpoints: IndexMap<&'static str, EndpointSpec>,
}

impl Default for EndpointCatalogue {
    fn default() -> Self {
        Self {
            endpoints: BRIA_ENDPOINTS
                .iter()
                .map(|endpoint| (endpoint.name, *endpoint))
                .collect(),
        }
    }
}

impl EndpointCatalogue {
    pub fn get(&self, name: &str) -> Option<&EndpointSpec> {
        self.endpoints.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &EndpointSpec> {
        self.endpoints.values()
    }
}
